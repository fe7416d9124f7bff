//! Filter that holds every chunk for a while before passing it on
//!
//! Each chunk suspends the track on a host timer; the timer task fires the
//! track's waker and the chunk goes out on the next call. The delay comes
//! from the dictionary entry `delay_ms`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::Result;
use crate::filter::{Filter, FilterInstance, FilterStatus, Opened};
use crate::host::{TaskPoster, TimerId};
use crate::track::FilterContext;

pub const DEFAULT_DELAY_MS: u64 = 10;

/// Delays each chunk on a host timer
pub struct DelayFilter;

struct Pending {
    data: Vec<u8>,
    fired: Arc<AtomicBool>,
    timer: TimerId,
}

struct DelayInstance {
    delay: Duration,
    host: Option<Arc<dyn TaskPoster>>,
    pending: Option<Pending>,
}

impl Filter for DelayFilter {
    fn name(&self) -> &str {
        "core.delay"
    }

    fn open(&self, ctx: &mut FilterContext<'_>) -> Result<Opened> {
        let ms = ctx
            .get_int("delay_ms")
            .and_then(|v| u64::try_from(v).ok())
            .unwrap_or(DEFAULT_DELAY_MS);
        let host = ctx.host();
        if host.is_none() {
            warn!(track = %ctx.track_id(), "no host timer available, data passes without delay");
        }
        Ok(Opened::new(DelayInstance {
            delay: Duration::from_millis(ms),
            host,
            pending: None,
        }))
    }
}

impl DelayInstance {
    fn release(&mut self, ctx: &mut FilterContext<'_>, data: Vec<u8>) -> FilterStatus {
        ctx.set_output(data);
        if ctx.is_last() {
            FilterStatus::Done
        } else {
            FilterStatus::Ok
        }
    }
}

impl FilterInstance for DelayInstance {
    fn process(&mut self, ctx: &mut FilterContext<'_>) -> FilterStatus {
        if let Some(pending) = self.pending.take() {
            let stopping = ctx.stop_requested();
            if !pending.fired.load(Ordering::SeqCst) && !stopping {
                // woken before the timer fired
                self.pending = Some(pending);
                return FilterStatus::Async;
            }
            if stopping {
                if let Some(host) = &self.host {
                    host.cancel_timer(pending.timer);
                }
            }
            return self.release(ctx, pending.data);
        }

        let data = ctx.take_input();
        if data.is_empty() && !ctx.is_last() {
            return FilterStatus::More;
        }
        let host = match &self.host {
            Some(host) if !data.is_empty() && !ctx.stop_requested() => Some(Arc::clone(host)),
            _ => None,
        };
        let Some(host) = host else {
            return self.release(ctx, data);
        };

        let fired = Arc::new(AtomicBool::new(false));
        let waker = ctx.waker();
        let flag = Arc::clone(&fired);
        let timer = host.set_timer(
            self.delay,
            Box::new(move || {
                flag.store(true, Ordering::SeqCst);
                waker.wake();
            }),
        );
        debug!(track = %ctx.track_id(), bytes = data.len(), %timer, "holding chunk");
        self.pending = Some(Pending { data, fired, timer });
        FilterStatus::Async
    }

    fn close(&mut self, _ctx: &mut FilterContext<'_>) {
        if let (Some(pending), Some(host)) = (self.pending.take(), &self.host) {
            host.cancel_timer(pending.timer);
        }
    }
}
