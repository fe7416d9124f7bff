//! Filter capability contract
//!
//! A filter is a factory (`Filter`) that produces one `FilterInstance` per
//! track slot. The instance owns all of its state until `close`.

use std::fmt;

use crate::error::Result;
use crate::track::FilterContext;

/// Status returned by `FilterInstance::process`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterStatus {
    /// Output is ready, call me again even without new input
    Data,
    /// Output is ready; call me again once there is new input
    Ok,
    /// Output is complete, remove this slot from the chain
    Done,
    /// Output is complete, remove this slot and every slot before it
    LastOut,
    /// Output is ready and the next slot will receive no more input after it
    NextDone,
    /// More input is needed
    More,
    /// Same as `More`, but hand the current output back to the previous slot
    Back,
    /// An asynchronous operation is scheduled; the filter will fire the waker
    Async,
    /// Close the track
    Fin,
    /// System error, close the track
    SysError,
    /// Output is complete but the filter hit an error it wants recorded
    DoneError,
    /// Fatal error, close the track
    Error,
}

impl FilterStatus {
    /// Error taxonomy bucket for this status
    pub fn kind(self) -> FailureKind {
        match self {
            FilterStatus::Data | FilterStatus::Ok | FilterStatus::NextDone => {
                FailureKind::Progress
            }
            FilterStatus::More | FilterStatus::Back => FailureKind::RecoverableNeedMoreInput,
            FilterStatus::Async => FailureKind::TransientAsyncPending,
            FilterStatus::Done | FilterStatus::LastOut | FilterStatus::DoneError => {
                FailureKind::NormalCompletion
            }
            FilterStatus::Error | FilterStatus::SysError => FailureKind::FatalFilterError,
            FilterStatus::Fin => FailureKind::ForcedStop,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FilterStatus::Data => "data",
            FilterStatus::Ok => "ok",
            FilterStatus::Done => "done",
            FilterStatus::LastOut => "last-out",
            FilterStatus::NextDone => "next-done",
            FilterStatus::More => "more",
            FilterStatus::Back => "back",
            FilterStatus::Async => "async",
            FilterStatus::Fin => "fin",
            FilterStatus::SysError => "syserr",
            FilterStatus::DoneError => "done-err",
            FilterStatus::Error => "err",
        }
    }
}

impl fmt::Display for FilterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the scheduler classifies a returned status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Progress,
    RecoverableNeedMoreInput,
    TransientAsyncPending,
    NormalCompletion,
    FatalFilterError,
    ForcedStop,
}

/// Result of `Filter::open`
pub enum Opened {
    /// The filter participates; the instance is owned by the slot
    Instance(Box<dyn FilterInstance>),
    /// The filter declines; its slot is removed without `close`
    Skip,
}

impl Opened {
    pub fn new(instance: impl FilterInstance + 'static) -> Self {
        Opened::Instance(Box::new(instance))
    }
}

impl fmt::Debug for Opened {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Opened::Instance(_) => f.write_str("Opened::Instance"),
            Opened::Skip => f.write_str("Opened::Skip"),
        }
    }
}

/// Filter implementation resolved by name through the module registry
pub trait Filter: Send + Sync {
    /// Registered name, e.g. "file.in"
    fn name(&self) -> &str;

    /// Create per-slot state.
    ///
    /// Called right before the slot's first `process`, with the input the
    /// slot is about to receive already visible on the context.
    fn open(&self, ctx: &mut FilterContext<'_>) -> Result<Opened>;
}

/// Per-slot filter state
pub trait FilterInstance: Send {
    /// Consume `ctx.input()` and/or produce `ctx.output_mut()`
    fn process(&mut self, ctx: &mut FilterContext<'_>) -> FilterStatus;

    /// Release resources. Called exactly once for an opened slot.
    fn close(&mut self, _ctx: &mut FilterContext<'_>) {}
}
