//! trackflow - filter-chain execution engine
//!
//! A track drives an ordered, mutable chain of filters over one data flow.
//! The scheduler moves a cursor along the chain: forward with each filter's
//! output, backward when a filter needs more input. Filters can insert new
//! filters while running, suspend on external events and resume later, and
//! talk to each other through a per-track dictionary.
//!
//! # Architecture
//!
//! - `track`: the track, its scheduler, chain mutation and wake handles
//! - `registry`: name to filter resolution, with lazily loaded modules
//! - `host`: worker threads that own and drive tracks
//! - `filters`: built-in file, stream and passthrough filters

pub mod chain;
pub mod cli;
pub mod config;
pub mod dict;
pub mod engine;
pub mod error;
pub mod filter;
pub mod filters;
pub mod host;
pub mod registry;
pub mod track;

pub use config::EngineConfig;
pub use dict::{DictValue, TrackDict};
pub use engine::Engine;
pub use error::{Result, TrackError};
pub use filter::{FailureKind, Filter, FilterInstance, FilterStatus, Opened};
pub use registry::{ExtKind, ModuleRegistry};
pub use track::{
    FilterContext, SchedulerOutcome, SlotHandle, Track, TrackId, TrackKind, TrackMonitor,
    TrackReport, TrackState,
};
