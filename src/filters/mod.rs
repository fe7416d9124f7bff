//! Built-in filters

mod copy;
mod delay;
mod file;

use std::sync::Arc;

use crate::registry::{ExtKind, ModuleRegistry};

pub use copy::CopyFilter;
pub use delay::{DelayFilter, DEFAULT_DELAY_MS};
pub use file::{FileInput, FileOutput, StdinInput, StdoutOutput};

/// Register the built-in filters and their extension bindings
pub fn register_builtins(registry: &ModuleRegistry) {
    registry.register(Arc::new(FileInput));
    registry.register(Arc::new(StdinInput));
    registry.register(Arc::new(FileOutput));
    registry.register(Arc::new(StdoutOutput));
    registry.register(Arc::new(CopyFilter));
    registry.register(Arc::new(DelayFilter));

    // raw data needs no codec
    registry.bind_extension(ExtKind::Input, "raw", "core.copy");
    registry.bind_extension(ExtKind::Output, "raw", "core.copy");
}
