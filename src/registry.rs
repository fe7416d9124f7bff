//! Module registry
//!
//! Resolves filter names ("module.filter") to implementations. Filters are
//! either registered eagerly or produced on first use by a per-module
//! loader; every resolved filter is cached. The registry is shared between
//! tracks running on different workers, so all state sits behind locks.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::error::{Result, TrackError};
use crate::filter::Filter;
use crate::filters;

/// Produces the filter named `name` for one module, or `None`.
///
/// Runs without any registry lock held, so it may call back into the
/// registry.
pub type ModuleLoader = Box<dyn Fn(&str) -> Option<Arc<dyn Filter>> + Send + Sync>;

type SharedLoader = Arc<dyn Fn(&str) -> Option<Arc<dyn Filter>> + Send + Sync>;

/// Which side of a track an extension binding selects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtKind {
    Input,
    Output,
}

#[derive(Default)]
struct RegistryState {
    filters: HashMap<String, Arc<dyn Filter>>,
    loaders: HashMap<String, SharedLoader>,
    extensions: HashMap<(ExtKind, String), String>,
    closed: bool,
}

/// Registry of available filters
pub struct ModuleRegistry {
    state: RwLock<RegistryState>,
}

impl ModuleRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
        }
    }

    /// Create registry with the built-in filters
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        filters::register_builtins(&registry);
        registry
    }

    /// Register a filter under its own name
    pub fn register(&self, filter: Arc<dyn Filter>) {
        let name = filter.name().to_string();
        debug!(filter = %name, "registered filter");
        self.state.write().filters.insert(name, filter);
    }

    /// Register a loader for every "module.*" name not registered eagerly
    pub fn register_loader(&self, module: &str, loader: ModuleLoader) {
        debug!(module, "registered module loader");
        self.state
            .write()
            .loaders
            .insert(module.to_string(), Arc::from(loader));
    }

    /// Bind a file extension to the filter handling it
    pub fn bind_extension(&self, kind: ExtKind, ext: &str, filter: &str) {
        self.state
            .write()
            .extensions
            .insert((kind, ext.to_ascii_lowercase()), filter.to_string());
    }

    /// Get the filter name bound to an extension
    pub fn filter_for_extension(&self, kind: ExtKind, ext: &str) -> Option<String> {
        self.state
            .read()
            .extensions
            .get(&(kind, ext.to_ascii_lowercase()))
            .cloned()
    }

    /// Resolve a filter by name, loading its module if needed
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Filter>> {
        {
            let state = self.state.read();
            if state.closed {
                return Err(TrackError::RegistryClosed);
            }
            if let Some(filter) = state.filters.get(name) {
                return Ok(Arc::clone(filter));
            }
        }

        let module = name.split('.').next().unwrap_or(name);
        let loader = self.state.read().loaders.get(module).cloned();
        let loaded = loader
            .and_then(|load| load(name))
            .ok_or_else(|| TrackError::FilterNotFound {
                name: name.to_string(),
            })?;

        let mut state = self.state.write();
        if state.closed {
            return Err(TrackError::RegistryClosed);
        }
        // a concurrent resolve may have cached it first
        let filter = Arc::clone(state.filters.entry(name.to_string()).or_insert(loaded));
        info!(filter = name, module, "loaded filter");
        Ok(filter)
    }

    /// Check if a filter is available without loading it
    pub fn has_filter(&self, name: &str) -> bool {
        self.state.read().filters.contains_key(name)
    }

    /// List all resolved filter names, sorted
    pub fn list_filters(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.read().filters.keys().cloned().collect();
        names.sort();
        names
    }

    /// Drop every cached filter and loader; later lookups fail
    pub fn shutdown(&self) {
        let mut state = self.state.write();
        state.filters.clear();
        state.loaders.clear();
        state.extensions.clear();
        state.closed = true;
        info!("module registry shut down");
    }

    pub fn is_closed(&self) -> bool {
        self.state.read().closed
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Opened;
    use crate::track::FilterContext;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Named(String);

    impl Filter for Named {
        fn name(&self) -> &str {
            &self.0
        }

        fn open(&self, _ctx: &mut FilterContext<'_>) -> Result<Opened> {
            Ok(Opened::Skip)
        }
    }

    #[test]
    fn test_registry_builtins() {
        let registry = ModuleRegistry::with_builtins();
        assert!(registry.has_filter("file.in"));
        assert!(registry.has_filter("core.copy"));
        assert!(registry.resolve("file.out").is_ok());
        assert!(registry.resolve("nonexistent.filter").is_err());
    }

    #[test]
    fn test_lazy_loader_is_cached() {
        let registry = ModuleRegistry::new();
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&loads);
        registry.register_loader(
            "mpeg",
            Box::new(move |name: &str| {
                counter.fetch_add(1, Ordering::SeqCst);
                (name == "mpeg.decode")
                    .then(|| Arc::new(Named(name.to_string())) as Arc<dyn Filter>)
            }),
        );

        assert!(!registry.has_filter("mpeg.decode"));
        assert_eq!(registry.resolve("mpeg.decode").unwrap().name(), "mpeg.decode");
        assert_eq!(registry.resolve("mpeg.decode").unwrap().name(), "mpeg.decode");
        assert_eq!(loads.load(Ordering::SeqCst), 1);

        let err = registry.resolve("mpeg.encode").err().unwrap();
        assert_eq!(err.error_code(), "FILTER_NOT_FOUND");
    }

    #[test]
    fn test_loader_may_call_back_into_registry() {
        let registry = Arc::new(ModuleRegistry::with_builtins());
        let weak = Arc::downgrade(&registry);
        registry.register_loader(
            "alias",
            Box::new(move |name: &str| {
                let registry = weak.upgrade()?;
                let target = registry.resolve("core.copy").ok()?;
                registry.register(Arc::new(Named("alias.seen".to_string())));
                (name == "alias.copy").then_some(target)
            }),
        );

        let filter = registry.resolve("alias.copy").unwrap();
        assert_eq!(filter.name(), "core.copy");
        assert!(registry.has_filter("alias.copy"));
        assert!(registry.has_filter("alias.seen"));
    }

    #[test]
    fn test_extension_binding() {
        let registry = ModuleRegistry::new();
        registry.bind_extension(ExtKind::Input, "MP3", "mpeg.decode");
        assert_eq!(
            registry.filter_for_extension(ExtKind::Input, "mp3").as_deref(),
            Some("mpeg.decode")
        );
        assert_eq!(registry.filter_for_extension(ExtKind::Output, "mp3"), None);
    }

    #[test]
    fn test_shutdown() {
        let registry = ModuleRegistry::with_builtins();
        registry.shutdown();
        assert!(registry.is_closed());
        let err = registry.resolve("file.in").err().unwrap();
        assert_eq!(err.error_code(), "REGISTRY_CLOSED");
    }
}
