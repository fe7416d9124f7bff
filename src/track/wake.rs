//! Wake and stop signals
//!
//! A filter that returns `Async` keeps a `TrackWaker` and fires it once its
//! external event completes. The waker only calls the handler installed by
//! the host; it never drives the track itself. Hosts whose handler may run
//! on a foreign thread must forward the wake to the track's own worker.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

/// Callback installed by the host
pub type WakeHandler = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct WakeSlot {
    handler: Mutex<Option<WakeHandler>>,
    wakes: AtomicU64,
}

/// Cloneable handle that resumes a suspended track
#[derive(Clone, Default)]
pub struct TrackWaker {
    slot: Arc<WakeSlot>,
}

impl TrackWaker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the handler; clones made earlier see the new handler
    pub fn set_handler(&self, handler: WakeHandler) {
        *self.slot.handler.lock() = Some(handler);
    }

    pub fn clear_handler(&self) {
        *self.slot.handler.lock() = None;
    }

    /// Ask the host to drive the track again
    pub fn wake(&self) {
        self.slot.wakes.fetch_add(1, Ordering::SeqCst);
        let handler = self.slot.handler.lock().clone();
        match handler {
            Some(handler) => handler(),
            None => warn!("wake requested but no wake handler is installed"),
        }
    }

    /// Number of wakes fired so far
    pub fn wake_count(&self) -> u64 {
        self.slot.wakes.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for TrackWaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackWaker")
            .field("wakes", &self.wake_count())
            .finish()
    }
}

/// Host-side stop request, visible to filters on their next `process`
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    requested: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}
