//! Host runtime
//!
//! Worker threads own tracks and drive them: on submission, on wake, and
//! after pause/stop requests. Filters reach the worker through
//! [`TaskPoster`] to run deferred work or arm timers, and through the
//! track's waker to resume after `Async`.

mod pool;
mod worker;

use std::fmt;
use std::time::Duration;

pub use pool::WorkerPool;
pub use worker::{TrackTicket, Worker, WorkerHandle};

/// Deferred work run on a worker thread
pub type Task = Box<dyn FnOnce() + Send>;

/// Identifier of an armed timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

/// Schedules work on the thread that owns a track
pub trait TaskPoster: Send + Sync {
    /// Run `task` on the worker thread as soon as possible
    fn post(&self, task: Task);

    /// Run `task` on the worker thread after `delay`
    fn set_timer(&self, delay: Duration, task: Task) -> TimerId;

    /// Cancel a timer that has not fired yet
    fn cancel_timer(&self, id: TimerId);
}
