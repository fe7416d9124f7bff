//! Track: one end-to-end unit of work driven by the engine
//!
//! A track owns its filter chain, the cursor over it, two dictionaries
//! (signals and case-folded metadata) and the wake/stop handles shared with
//! its filters and host. It is driven from one thread at a time and never
//! reused after it completes.

mod context;
mod mutation;
mod scheduler;
mod slot;
mod wake;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::chain::{Chain, SlotId};
use crate::config::EngineConfig;
use crate::dict::{DictValue, TrackDict};
use crate::error::{Result, TrackError};
use crate::host::TaskPoster;
use crate::registry::ModuleRegistry;

pub use context::FilterContext;
pub use scheduler::{drive, SchedulerOutcome};
pub use slot::{DataBuf, SlotHandle};
pub use wake::{StopHandle, TrackWaker, WakeHandler};

use slot::FilterSlot;

/// Track identifier, printed as `*N` in logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TrackId(pub u64);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "*{}", self.0)
    }
}

/// What the track does; decides the initial chain a host builds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Playback,
    Record,
    MixIn,
    MixOut,
    NetIn,
    Convert,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TrackKind::Playback => "playback",
            TrackKind::Record => "record",
            TrackKind::MixIn => "mix-in",
            TrackKind::MixOut => "mix-out",
            TrackKind::NetIn => "net-in",
            TrackKind::Convert => "convert",
        };
        f.write_str(s)
    }
}

/// Lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackState {
    /// Built, filters may be appended
    #[default]
    Created,
    /// Being driven
    Active,
    /// Waiting for a wake
    Suspended,
    /// Held by the host; `drive` does nothing until unpaused
    Paused,
    Finished,
    Failed,
}

impl TrackState {
    pub fn as_str(self) -> &'static str {
        match self {
            TrackState::Created => "created",
            TrackState::Active => "active",
            TrackState::Suspended => "suspended",
            TrackState::Paused => "paused",
            TrackState::Finished => "finished",
            TrackState::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TrackState::Finished | TrackState::Failed)
    }
}

impl fmt::Display for TrackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary of a completed track
#[derive(Debug, Clone, Serialize)]
pub struct TrackReport {
    pub id: TrackId,
    pub kind: TrackKind,
    pub outcome: SchedulerOutcome,
    pub error: Option<String>,
    pub steps: u64,
    pub dict: Vec<(String, DictValue)>,
    pub created_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Host hook notified when tracks are torn down
pub trait TrackMonitor: Send + Sync {
    fn on_close(&self, report: &TrackReport);
}

pub struct Track {
    id: TrackId,
    kind: TrackKind,
    pub(crate) state: TrackState,
    pub(crate) chain: Chain<FilterSlot>,
    pub(crate) cursor: Option<SlotId>,
    pub(crate) dict: TrackDict,
    pub(crate) meta: TrackDict,
    /// Input of the slot being called
    pub(crate) input: DataBuf,
    /// Output of the slot being called
    pub(crate) output: Vec<u8>,
    pub(crate) forward: bool,
    pub(crate) last: bool,
    pub(crate) registry: Arc<ModuleRegistry>,
    pub(crate) config: EngineConfig,
    pub(crate) waker: TrackWaker,
    pub(crate) stop: StopHandle,
    pub(crate) host: Option<Arc<dyn TaskPoster>>,
    pub(crate) monitor: Option<Arc<dyn TrackMonitor>>,
    /// Error reported by a filter or the dictionary during the current step
    pub(crate) pending_error: Option<TrackError>,
    pub(crate) last_error: Option<TrackError>,
    pub(crate) outcome: Option<SchedulerOutcome>,
    /// Slots ever added, bounded by `max_filters`
    pub(crate) added: usize,
    /// Bumped on every insertion or removal
    pub(crate) chain_version: u64,
    pub(crate) steps: u64,
    pub(crate) idle_steps: usize,
    /// Processing time of closed slots
    pub(crate) timings: Vec<(Arc<str>, Duration)>,
    created_at: DateTime<Utc>,
    pub(crate) finished_at: Option<DateTime<Utc>>,
}

impl Track {
    /// Create an empty track
    pub fn new(
        id: TrackId,
        kind: TrackKind,
        registry: Arc<ModuleRegistry>,
        config: EngineConfig,
    ) -> Self {
        Self {
            id,
            kind,
            state: TrackState::Created,
            chain: Chain::new(),
            cursor: None,
            dict: TrackDict::new(),
            meta: TrackDict::case_folded(),
            input: DataBuf::default(),
            output: Vec::new(),
            forward: false,
            last: false,
            registry,
            config,
            waker: TrackWaker::new(),
            stop: StopHandle::default(),
            host: None,
            monitor: None,
            pending_error: None,
            last_error: None,
            outcome: None,
            added: 0,
            chain_version: 0,
            steps: 0,
            idle_steps: 0,
            timings: Vec::new(),
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn id(&self) -> TrackId {
        self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn state(&self) -> TrackState {
        self.state
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Final outcome once the track has completed
    pub fn outcome(&self) -> Option<SchedulerOutcome> {
        self.outcome
    }

    /// Error that failed the track, or that a `DoneError` recorded
    pub fn last_error(&self) -> Option<&TrackError> {
        self.last_error.as_ref()
    }

    /// Number of filter invocations so far
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Append a filter at the end of the chain
    pub fn append_filter(&mut self, name: &str) -> Result<SlotHandle> {
        self.insert_at_tail(name)
    }

    /// Place the cursor on the first slot and make the track drivable
    pub fn start(&mut self) -> Result<()> {
        if self.state != TrackState::Created {
            return Err(TrackError::InvalidState {
                state: self.state.as_str(),
                expected: "created",
            });
        }
        let first = self.chain.first().ok_or(TrackError::EmptyChain)?;
        self.cursor = Some(first);
        self.refresh_head();
        self.state = TrackState::Active;
        info!(track = %self.id, kind = %self.kind, chain = %self.chain_string(None), "track started");
        Ok(())
    }

    /// Request a stop.
    ///
    /// A track that is not being driven is torn down right away. A running
    /// or suspended track only gets the flag; its filters see it on their
    /// next `process` and are expected to wind down.
    pub fn stop(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        self.stop.request();
        if let Err(e) = self.dict.set("stopped", 1) {
            warn!(track = %self.id, error = %e, "can't record stop request");
        }
        match self.state {
            TrackState::Created | TrackState::Paused => {
                info!(track = %self.id, state = %self.state, "stopping idle track");
                scheduler::abort(self, TrackError::ForcedStop);
            }
            _ => info!(track = %self.id, "stop requested"),
        }
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop.is_requested()
    }

    pub fn pause(&mut self) {
        if matches!(self.state, TrackState::Active | TrackState::Suspended) {
            self.state = TrackState::Paused;
            info!(track = %self.id, "track paused");
        }
    }

    /// Leave the paused state; the host must drive the track again
    pub fn unpause(&mut self) {
        if self.state == TrackState::Paused {
            self.state = TrackState::Active;
            info!(track = %self.id, "track unpaused");
        }
    }

    /// Run the scheduler until the track suspends or completes
    pub fn drive(&mut self) -> SchedulerOutcome {
        scheduler::drive(self)
    }

    /// Tear down a track that will not be driven again
    pub(crate) fn abort(&mut self, err: TrackError) {
        if !self.state.is_terminal() {
            scheduler::abort(self, err);
        }
    }

    /// Run exactly one filter invocation; `None` means keep going
    pub fn step(&mut self) -> Option<SchedulerOutcome> {
        scheduler::step(self)
    }

    pub fn dict(&self) -> &TrackDict {
        &self.dict
    }

    pub fn dict_mut(&mut self) -> &mut TrackDict {
        &mut self.dict
    }

    /// Metadata (tags); names are case-folded
    pub fn meta(&self) -> &TrackDict {
        &self.meta
    }

    pub fn meta_mut(&mut self) -> &mut TrackDict {
        &mut self.meta
    }

    pub fn dict_get(&self, name: &str) -> Option<&DictValue> {
        self.dict.get(name)
    }

    pub fn dict_set(&mut self, name: &str, value: impl Into<DictValue>) -> Result<()> {
        self.dict.set_value(name, value.into())
    }

    pub fn dict_pop(&mut self, name: &str) -> Option<DictValue> {
        self.dict.pop(name)
    }

    pub fn waker(&self) -> TrackWaker {
        self.waker.clone()
    }

    pub fn set_wake_handler(&mut self, handler: WakeHandler) {
        self.waker.set_handler(handler);
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Attach the task poster filters use to schedule their own wake-ups
    pub fn set_host(&mut self, host: Arc<dyn TaskPoster>) {
        self.host = Some(host);
    }

    pub fn set_monitor(&mut self, monitor: Arc<dyn TrackMonitor>) {
        self.monitor = Some(monitor);
    }

    /// Slot under the cursor
    pub fn current(&self) -> Option<SlotHandle> {
        self.cursor.map(SlotHandle)
    }

    /// Name of a live slot
    pub fn slot_name(&self, handle: SlotHandle) -> Option<&str> {
        self.chain.get(handle.0).map(|s| &*s.name)
    }

    pub fn contains_slot(&self, handle: SlotHandle) -> bool {
        self.chain.contains(handle.0)
    }

    /// Names of the live slots from head to tail
    pub fn filter_names(&self) -> Vec<String> {
        self.chain.iter().map(|(_, s)| s.name.to_string()).collect()
    }

    /// "a -> *b -> c" with `mark` (or the cursor) starred
    pub fn chain_string(&self, mark: Option<SlotId>) -> String {
        let mark = mark.or(self.cursor);
        self.chain
            .iter()
            .map(|(id, s)| {
                if Some(id) == mark {
                    format!("*{}", s.name)
                } else {
                    s.name.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(" -> ")
    }

    /// Recompute `is_chain_head` after the head may have changed
    pub(crate) fn refresh_head(&mut self) {
        let first = self.chain.first();
        for id in self.chain.ids() {
            if let Some(slot) = self.chain.get_mut(id) {
                let head = Some(id) == first;
                if head && !slot.is_chain_head {
                    tracing::debug!(track = %self.id, filter = %slot.name, "filter is now the chain head");
                }
                slot.is_chain_head = head;
            }
        }
    }

    /// Build the completion summary
    pub fn report(&self) -> TrackReport {
        TrackReport {
            id: self.id,
            kind: self.kind,
            outcome: self.outcome.unwrap_or(SchedulerOutcome::Suspended),
            error: self.last_error.as_ref().map(|e| e.to_string()),
            steps: self.steps,
            dict: self.dict.snapshot(),
            created_at: self.created_at,
            finished_at: self.finished_at.unwrap_or_else(Utc::now),
        }
    }
}

impl fmt::Debug for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Track")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("state", &self.state)
            .field("chain", &self.chain_string(None))
            .finish()
    }
}

impl Drop for Track {
    fn drop(&mut self) {
        let opened = self.chain.iter().any(|(_, s)| s.opened);
        if !self.state.is_terminal() && opened {
            warn!(track = %self.id, state = %self.state, "track dropped while running, closing filters");
            scheduler::abort(self, TrackError::ForcedStop);
        }
    }
}
