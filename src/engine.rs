//! Track factory
//!
//! The engine hands out track ids, shares one module registry and one
//! configuration between all tracks, and builds the input and output ends
//! of a chain from a path.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::error::Result;
use crate::registry::{ExtKind, ModuleRegistry};
use crate::track::{Track, TrackId, TrackKind, TrackMonitor};

/// Pseudo path selecting standard input
pub const STDIN: &str = "@stdin";

/// Pseudo path selecting standard output
pub const STDOUT: &str = "@stdout";

/// Filter used for http(s) inputs; provided by a loadable "net" module
pub const NET_INPUT_FILTER: &str = "net.http";

pub struct Engine {
    registry: Arc<ModuleRegistry>,
    config: EngineConfig,
    next_id: AtomicU64,
    monitor: Option<Arc<dyn TrackMonitor>>,
}

impl Engine {
    /// Engine with the built-in filters
    pub fn new(config: EngineConfig) -> Self {
        Self::with_registry(Arc::new(ModuleRegistry::with_builtins()), config)
    }

    pub fn with_registry(registry: Arc<ModuleRegistry>, config: EngineConfig) -> Self {
        Self {
            registry,
            config,
            next_id: AtomicU64::new(1),
            monitor: None,
        }
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Monitor attached to every track created from now on
    pub fn set_monitor(&mut self, monitor: Arc<dyn TrackMonitor>) {
        self.monitor = Some(monitor);
    }

    /// Create an empty track
    pub fn create(&self, kind: TrackKind) -> Track {
        let id = TrackId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let mut track = Track::new(id, kind, Arc::clone(&self.registry), self.config.clone());
        if let Some(monitor) = &self.monitor {
            track.set_monitor(Arc::clone(monitor));
        }
        debug!(track = %id, %kind, "created track");
        track
    }

    /// Create a track reading `path`
    pub fn open_input(&self, path: &str) -> Result<Track> {
        let kind = if is_url(path) {
            TrackKind::NetIn
        } else {
            TrackKind::Convert
        };
        let mut track = self.create(kind);
        self.add_input(&mut track, path)?;
        Ok(track)
    }

    /// Append the filters reading `path`: the reader, then the decoder
    /// bound to its extension if there is one
    pub fn add_input(&self, track: &mut Track, path: &str) -> Result<()> {
        track.dict_set("input", path)?;
        if path == STDIN {
            track.append_filter("file.stdin")?;
        } else if is_url(path) {
            track.append_filter(NET_INPUT_FILTER)?;
        } else {
            track.append_filter("file.in")?;
            self.append_bound(track, ExtKind::Input, path)?;
        }
        info!(track = %track.id(), input = path, "input: {}", path);
        Ok(())
    }

    /// Append the filters writing `path`: the encoder bound to its
    /// extension if there is one, then the writer
    pub fn set_output(&self, track: &mut Track, path: &str) -> Result<()> {
        track.dict_set("output", path)?;
        if path == STDOUT {
            track.append_filter("file.stdout")?;
        } else {
            self.append_bound(track, ExtKind::Output, path)?;
            track.append_filter("file.out")?;
        }
        debug!(track = %track.id(), output = path, "output set");
        Ok(())
    }

    fn append_bound(&self, track: &mut Track, kind: ExtKind, path: &str) -> Result<()> {
        let Some(ext) = Path::new(path).extension().and_then(|e| e.to_str()) else {
            return Ok(());
        };
        match self.registry.filter_for_extension(kind, ext) {
            Some(filter) => {
                track.append_filter(&filter)?;
            }
            None => debug!(track = %track.id(), ext, "no filter bound to extension, data passes unchanged"),
        }
        Ok(())
    }

    /// Shut the module registry down; tracks can no longer add filters
    pub fn shutdown(&self) {
        self.registry.shutdown();
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

fn is_url(path: &str) -> bool {
    path.starts_with("http://") || path.starts_with("https://")
}
