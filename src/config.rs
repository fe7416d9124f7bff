//! Engine configuration
//!
//! Values that shape scheduling and resource limits. Hosts usually build
//! this from defaults and override a few fields from the command line.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default number of filters a single track may hold
pub const DEFAULT_MAX_FILTERS: usize = 32;

/// Default number of idle scheduler steps before a track is declared stalled
pub const DEFAULT_STALL_STEP_LIMIT: usize = 64;

/// Default read size of the built-in input filters
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on slots ever added to one track
    pub max_filters: usize,

    /// Consecutive steps without data movement or chain change that fail a track.
    /// The count restarts whenever a filter suspends. `0` disables the guard.
    pub stall_step_limit: usize,

    /// Filter invocations per `drive` call before the track yields to the host.
    /// `None` runs until the track suspends or terminates.
    pub max_steps_per_drive: Option<usize>,

    /// Read size used by `file.in` and `file.stdin`
    pub chunk_size: usize,

    /// Number of worker threads a `WorkerPool` starts
    pub worker_threads: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_filters: DEFAULT_MAX_FILTERS,
            stall_step_limit: DEFAULT_STALL_STEP_LIMIT,
            max_steps_per_drive: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            worker_threads: 1,
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from JSON; missing fields keep their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a JSON configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}
