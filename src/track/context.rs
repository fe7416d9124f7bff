//! Shared context handed to a filter for one `open`/`process`/`close` call

use std::sync::Arc;

use tracing::warn;

use crate::chain::SlotId;
use crate::config::EngineConfig;
use crate::dict::{DictValue, TrackDict};
use crate::error::{Result, TrackError};
use crate::host::TaskPoster;

use super::slot::SlotHandle;
use super::{Track, TrackId, TrackKind, TrackWaker};

/// View of the track given to the filter being called.
///
/// The filter's own instance is detached from the chain while it runs, so
/// the context can expose the whole track (dictionary, chain mutation)
/// without aliasing the caller.
pub struct FilterContext<'t> {
    track: &'t mut Track,
    slot: SlotId,
    name: Arc<str>,
}

impl<'t> FilterContext<'t> {
    pub(crate) fn new(track: &'t mut Track, slot: SlotId, name: Arc<str>) -> Self {
        Self { track, slot, name }
    }

    pub fn track_id(&self) -> TrackId {
        self.track.id()
    }

    pub fn track_kind(&self) -> TrackKind {
        self.track.kind()
    }

    /// Name of the filter being called
    pub fn filter_name(&self) -> &str {
        &self.name
    }

    /// Handle of the slot being called
    pub fn slot(&self) -> SlotHandle {
        SlotHandle(self.slot)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.track.config
    }

    // Flags

    /// This call delivers new input rather than re-polling for more output
    pub fn is_forward(&self) -> bool {
        self.track.forward
    }

    /// No more input will arrive after the current one
    pub fn is_last(&self) -> bool {
        self.track.last
    }

    /// The host asked the track to stop
    pub fn stop_requested(&self) -> bool {
        self.track.stop.is_requested()
    }

    // Data

    /// Unconsumed input
    pub fn input(&self) -> &[u8] {
        self.track.input.remaining()
    }

    /// Mark `n` input bytes as consumed; the rest stays for the next call
    pub fn consume(&mut self, n: usize) {
        self.track.input.consume(n);
    }

    pub fn consume_all(&mut self) {
        self.track.input.consume_all();
    }

    /// Take the unconsumed input
    pub fn take_input(&mut self) -> Vec<u8> {
        self.track.input.take()
    }

    pub fn output(&self) -> &[u8] {
        &self.track.output
    }

    pub fn output_mut(&mut self) -> &mut Vec<u8> {
        &mut self.track.output
    }

    pub fn set_output(&mut self, data: Vec<u8>) {
        self.track.output = data;
    }

    // Dictionary

    pub fn dict(&self) -> &TrackDict {
        &self.track.dict
    }

    pub fn meta(&self) -> &TrackDict {
        &self.track.meta
    }

    pub fn get(&self, name: &str) -> Option<&DictValue> {
        self.track.dict.get(name)
    }

    pub fn get_int(&self, name: &str) -> Option<i64> {
        self.track.dict.get_int(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.track.dict.get_str(name)
    }

    pub fn pop(&mut self, name: &str) -> Option<DictValue> {
        self.track.dict.pop(name)
    }

    pub fn pop_int(&mut self, name: &str) -> Option<i64> {
        self.track.dict.pop_int(name)
    }

    /// Set an integer value; a name collision fails the track after this call
    pub fn set(&mut self, name: &str, value: i64) {
        let r = self.track.dict.set(name, value);
        self.check(r);
    }

    /// Set a string value; a name collision fails the track after this call
    pub fn set_str(&mut self, name: &str, value: impl Into<String>) {
        let r = self.track.dict.set_str(name, value);
        self.check(r);
    }

    /// Set a value unless the name exists; returns whether it was stored
    pub fn set_if_absent(&mut self, name: &str, value: impl Into<DictValue>) -> bool {
        match self.track.dict.set_if_absent(name, value.into()) {
            Ok(stored) => stored,
            Err(e) => {
                self.check(Err(e));
                false
            }
        }
    }

    pub fn set_meta(&mut self, name: &str, value: impl Into<String>) {
        let r = self.track.meta.set_str(name, value);
        self.check(r);
    }

    fn check(&mut self, r: Result<()>) {
        if let Err(e) = r {
            warn!(track = %self.track.id(), filter = %self.name, error = %e, "dictionary write failed");
            self.track.pending_error.get_or_insert(e);
        }
    }

    /// Attach a reason to the status about to be returned
    /// (`Error`, `SysError` or `DoneError`)
    pub fn report_error(&mut self, error: TrackError) {
        self.track.pending_error = Some(error);
    }

    // Suspension

    /// Waker to fire once after returning `Async`
    pub fn waker(&self) -> TrackWaker {
        self.track.waker.clone()
    }

    /// Host task poster, if the track runs under one
    pub fn host(&self) -> Option<Arc<dyn TaskPoster>> {
        self.track.host.clone()
    }

    // Chain mutation

    /// Insert a filter right after the calling slot
    pub fn insert_after_current(&mut self, name: &str) -> Result<SlotHandle> {
        self.track.insert_after(self.slot, name)
    }

    /// Insert a filter right before the calling slot
    pub fn insert_before_current(&mut self, name: &str) -> Result<SlotHandle> {
        self.track.insert_before(self.slot, name)
    }

    pub fn insert_at_head(&mut self, name: &str) -> Result<SlotHandle> {
        self.track.insert_at_head(name)
    }

    pub fn insert_at_tail(&mut self, name: &str) -> Result<SlotHandle> {
        self.track.insert_at_tail(name)
    }

    /// Name of the slot before the calling one
    pub fn prev_filter_name(&self) -> Option<&str> {
        let prev = self.track.chain.prev(self.slot)?;
        self.track.chain.get(prev).map(|s| &*s.name)
    }
}
