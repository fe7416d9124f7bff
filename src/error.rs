//! Error handling for trackflow
//!
//! The engine reports failures through a single error enum. Filter-level
//! failures never escape a track: the scheduler converts them into a
//! `Failed` outcome and keeps the error for the host to inspect.

use thiserror::Error;

/// Result type alias for trackflow operations
pub type Result<T> = std::result::Result<T, TrackError>;

/// Main error type for trackflow operations
#[derive(Error, Debug)]
pub enum TrackError {
    // Registry Errors
    #[error("no such filter: {name}")]
    FilterNotFound { name: String },

    #[error("module registry is shut down")]
    RegistryClosed,

    // Chain Errors
    #[error("can't add more filters: limit is {limit}")]
    TooManyFilters { limit: usize },

    #[error("filter chain is empty")]
    EmptyChain,

    #[error("invalid slot handle")]
    InvalidSlot,

    // Filter Errors
    #[error("{filter}: open failed: {reason}")]
    OpenFailed { filter: String, reason: String },

    #[error("{filter}: {reason}")]
    FilterFailed { filter: String, reason: String },

    #[error("{filter}: system error: {source}")]
    SystemError {
        filter: String,
        #[source]
        source: std::io::Error,
    },

    #[error("track was stopped")]
    ForcedStop,

    #[error("no progress after {steps} scheduler steps")]
    Stalled { steps: usize },

    // Dictionary Errors
    #[error("dictionary hash collision: key {name} collides with key {existing}")]
    DictCollision { name: String, existing: String },

    // Lifecycle Errors
    #[error("invalid track state: {state}, expected {expected}")]
    InvalidState {
        state: &'static str,
        expected: &'static str,
    },

    #[error("worker is not running")]
    WorkerClosed,

    // I/O Errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Configuration Errors
    #[error("configuration error: {0}")]
    Config(#[from] serde_json::Error),
}

impl TrackError {
    /// Build a filter failure from any displayable reason
    pub fn filter(filter: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        TrackError::FilterFailed {
            filter: filter.into(),
            reason: reason.to_string(),
        }
    }

    /// Build an open failure from any displayable reason
    pub fn open_failed(filter: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        TrackError::OpenFailed {
            filter: filter.into(),
            reason: reason.to_string(),
        }
    }

    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            TrackError::FilterNotFound { .. } => "FILTER_NOT_FOUND",
            TrackError::RegistryClosed => "REGISTRY_CLOSED",
            TrackError::TooManyFilters { .. } => "TOO_MANY_FILTERS",
            TrackError::EmptyChain => "EMPTY_CHAIN",
            TrackError::InvalidSlot => "INVALID_SLOT",
            TrackError::OpenFailed { .. } => "OPEN_FAILED",
            TrackError::FilterFailed { .. } => "FILTER_FAILED",
            TrackError::SystemError { .. } => "SYSTEM_ERROR",
            TrackError::ForcedStop => "FORCED_STOP",
            TrackError::Stalled { .. } => "STALLED",
            TrackError::DictCollision { .. } => "DICT_COLLISION",
            TrackError::InvalidState { .. } => "INVALID_STATE",
            TrackError::WorkerClosed => "WORKER_CLOSED",
            TrackError::Io(_) => "IO_ERROR",
            TrackError::Config(_) => "CONFIG_ERROR",
        }
    }

    /// Check if the host may retry the operation that produced this error.
    ///
    /// Errors raised while a track runs are never retried by the engine
    /// itself; this only tells a host whether building a fresh track for
    /// the same input has a chance to succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            TrackError::TooManyFilters { .. }
                | TrackError::ForcedStop
                | TrackError::SystemError { .. }
                | TrackError::Io(_)
        )
    }
}
