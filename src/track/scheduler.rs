//! Chain scheduler
//!
//! Drives the cursor over a track's filter chain. Each step calls the
//! slot under the cursor and turns the returned status into a cursor move:
//! forward with the slot's output, backward to ask upstream for more, or
//! out of `drive` on suspension or completion.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::chain::SlotId;
use crate::dict::DictValue;
use crate::error::TrackError;
use crate::filter::{FilterStatus, Opened};

use super::context::FilterContext;
use super::slot::FilterSlot;
use super::{Track, TrackState};

/// Result of one `drive` call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerOutcome {
    /// Waiting for a wake (or paused, or yielded); `drive` again later
    Suspended,
    Finished,
    Failed,
}

impl fmt::Display for SchedulerOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SchedulerOutcome::Suspended => "suspended",
            SchedulerOutcome::Finished => "finished",
            SchedulerOutcome::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Removal {
    Keep,
    /// The calling slot
    Current,
    /// The calling slot and every slot before it
    Prefix,
}

struct Call {
    status: FilterStatus,
    consumed: usize,
}

/// Drive `track` until it suspends or completes.
///
/// Re-entrant after `Suspended`: the next call resumes at the same cursor
/// with the same pending input.
pub fn drive(track: &mut Track) -> SchedulerOutcome {
    if let Some(outcome) = enter(track) {
        return outcome;
    }

    let mut calls = 0usize;
    loop {
        if let Some(limit) = track.config.max_steps_per_drive {
            if calls >= limit {
                track.state = TrackState::Suspended;
                debug!(track = %track.id(), calls, "yielding to host");
                track.waker.wake();
                return SchedulerOutcome::Suspended;
            }
        }
        calls += 1;
        if let Some(outcome) = step_active(track) {
            return outcome;
        }
    }
}

/// Run exactly one filter invocation
pub(crate) fn step(track: &mut Track) -> Option<SchedulerOutcome> {
    if let Some(outcome) = enter(track) {
        return Some(outcome);
    }
    step_active(track)
}

/// Leave `drive` early for tracks that must not run
fn enter(track: &mut Track) -> Option<SchedulerOutcome> {
    match track.state {
        TrackState::Finished | TrackState::Failed => {
            warn!(track = %track.id(), state = %track.state, "drive called on a completed track");
            Some(track.outcome.unwrap_or(SchedulerOutcome::Failed))
        }
        TrackState::Created => {
            warn!(track = %track.id(), "drive called before start");
            Some(SchedulerOutcome::Suspended)
        }
        TrackState::Paused => Some(SchedulerOutcome::Suspended),
        TrackState::Suspended => {
            debug!(track = %track.id(), chain = %track.chain_string(None), "resuming");
            track.state = TrackState::Active;
            None
        }
        TrackState::Active => None,
    }
}

fn step_active(track: &mut Track) -> Option<SchedulerOutcome> {
    if let Some(err) = track.pending_error.take() {
        return Some(fail(track, err));
    }
    let Some(cur) = track.cursor else {
        return Some(finish(track));
    };

    let version = track.chain_version;
    let call = invoke(track, cur);
    track.steps += 1;
    // output dropped by `More` never reaches another slot
    let produced = match call.status {
        FilterStatus::More => 0,
        _ => track.output.len(),
    };

    // A dictionary collision during a successful call still fails the track
    if !matches!(
        call.status,
        FilterStatus::Error | FilterStatus::SysError | FilterStatus::DoneError
    ) {
        if let Some(err) = track.pending_error.take() {
            return Some(fail(track, err));
        }
    }

    if let Some(outcome) = handle(track, cur, call.status) {
        return Some(outcome);
    }

    let progressed = call.consumed > 0 || produced > 0 || track.chain_version != version;
    if progressed {
        track.idle_steps = 0;
    } else {
        track.idle_steps += 1;
        let limit = track.config.stall_step_limit;
        if limit > 0 && track.idle_steps >= limit {
            let steps = track.idle_steps;
            return Some(fail(track, TrackError::Stalled { steps }));
        }
    }
    None
}

/// Call the slot under the cursor, opening it first if needed
fn invoke(track: &mut Track, id: SlotId) -> Call {
    let (name, filter, mut instance, opened) = match track.chain.get_mut(id) {
        Some(slot) => {
            track.forward = std::mem::take(&mut slot.new_data);
            track.last = slot.is_chain_head || slot.upstream_done;
            track.input = std::mem::take(&mut slot.pending);
            (
                Arc::clone(&slot.name),
                Arc::clone(&slot.filter),
                slot.instance.take(),
                slot.opened,
            )
        }
        None => {
            track.pending_error = Some(TrackError::InvalidSlot);
            return Call {
                status: FilterStatus::Error,
                consumed: 0,
            };
        }
    };

    let input_len = track.input.len();
    track.output.clear();
    debug!(
        track = %track.id(),
        filter = %name,
        dir = if track.forward { ">>" } else { "<<" },
        input = input_len,
        last = track.last,
        "calling filter"
    );

    let started = Instant::now();
    let mut skipped = false;
    let status = {
        let mut ctx = FilterContext::new(track, id, Arc::clone(&name));
        let mut open_failed = false;
        if !opened {
            debug!(filter = %name, "creating filter instance");
            match filter.open(&mut ctx) {
                Ok(Opened::Instance(i)) => instance = Some(i),
                Ok(Opened::Skip) => {
                    debug!(filter = %name, "filter is skipped");
                    skipped = true;
                }
                Err(e) => {
                    ctx.report_error(e);
                    open_failed = true;
                }
            }
        }

        if open_failed {
            FilterStatus::Error
        } else if skipped {
            let data = ctx.take_input();
            ctx.set_output(data);
            FilterStatus::Done
        } else {
            match instance.as_mut() {
                Some(i) => i.process(&mut ctx),
                None => {
                    ctx.report_error(TrackError::filter(&*name, "filter instance is missing"));
                    FilterStatus::Error
                }
            }
        }
    };
    let elapsed = started.elapsed();

    let remaining = std::mem::take(&mut track.input);
    let consumed = input_len.saturating_sub(remaining.len());
    if let Some(slot) = track.chain.get_mut(id) {
        slot.pending = remaining;
        slot.opened = instance.is_some();
        slot.instance = instance;
        slot.elapsed += elapsed;
    }

    debug!(
        track = %track.id(),
        filter = %name,
        status = %status,
        output = track.output.len(),
        "filter returned"
    );
    Call { status, consumed }
}

fn slot_name(track: &Track, id: SlotId) -> Arc<str> {
    track
        .chain
        .get(id)
        .map(|s| Arc::clone(&s.name))
        .unwrap_or_else(|| Arc::from("?"))
}

fn handle(track: &mut Track, cur: SlotId, status: FilterStatus) -> Option<SchedulerOutcome> {
    match status {
        FilterStatus::Async => {
            track.state = TrackState::Suspended;
            track.idle_steps = 0;
            if track.stop.is_requested() {
                debug!(track = %track.id(), filter = %slot_name(track, cur), "filter suspended after stop request");
            } else {
                debug!(track = %track.id(), filter = %slot_name(track, cur), "suspended");
            }
            Some(SchedulerOutcome::Suspended)
        }

        FilterStatus::Error => {
            let name = slot_name(track, cur);
            let err = track
                .pending_error
                .take()
                .unwrap_or_else(|| TrackError::filter(&*name, "fatal error"));
            Some(fail(track, err))
        }

        FilterStatus::SysError => {
            let name = slot_name(track, cur);
            let err = track
                .pending_error
                .take()
                .unwrap_or_else(|| TrackError::SystemError {
                    filter: name.to_string(),
                    source: std::io::Error::last_os_error(),
                });
            Some(fail(track, err))
        }

        FilterStatus::Fin => {
            info!(track = %track.id(), filter = %slot_name(track, cur), "filter closed the track");
            Some(fail(track, TrackError::ForcedStop))
        }

        FilterStatus::More => {
            if !track.output.is_empty() {
                warn!(
                    track = %track.id(),
                    filter = %slot_name(track, cur),
                    bytes = track.output.len(),
                    "filter asked for more input with output pending, dropping output"
                );
                track.output.clear();
            }
            shift_backward(track, cur, None)
        }

        FilterStatus::Back => {
            let out = std::mem::take(&mut track.output);
            shift_backward(track, cur, Some(out))
        }

        FilterStatus::Ok => {
            let same = match track.chain.get_mut(cur) {
                Some(slot) => {
                    slot.want_input = true;
                    !slot.pending.is_empty()
                }
                None => false,
            };
            shift_forward(track, cur, same, Removal::Keep)
        }

        FilterStatus::Data => shift_forward(track, cur, true, Removal::Keep),

        FilterStatus::NextDone => {
            if let Some(next) = track.chain.next(cur) {
                if let Some(slot) = track.chain.get_mut(next) {
                    slot.upstream_done = true;
                }
            }
            let same = match track.chain.get_mut(cur) {
                Some(slot) => {
                    slot.want_input = true;
                    !slot.pending.is_empty()
                }
                None => false,
            };
            shift_forward(track, cur, same, Removal::Keep)
        }

        FilterStatus::Done | FilterStatus::DoneError => {
            if status == FilterStatus::DoneError {
                record_soft_error(track, cur);
            }
            mark_done(track, cur);
            shift_forward(track, cur, false, Removal::Current)
        }

        FilterStatus::LastOut => {
            mark_done(track, cur);
            shift_forward(track, cur, false, Removal::Prefix)
        }
    }
}

fn mark_done(track: &mut Track, cur: SlotId) {
    if let Some(slot) = track.chain.get_mut(cur) {
        slot.pending.clear();
        slot.is_chain_tail_done = true;
    }
}

fn record_soft_error(track: &mut Track, cur: SlotId) {
    let name = slot_name(track, cur);
    let err = track
        .pending_error
        .take()
        .unwrap_or_else(|| TrackError::filter(&*name, "completed with error"));
    warn!(track = %track.id(), filter = %name, error = %err, "filter completed with error");
    if let Err(e) = track.dict.set_if_absent("error", DictValue::Int(1)) {
        warn!(track = %track.id(), error = %e, "can't record error");
    }
    track.last_error = Some(err);
}

/// Move towards the tail, delivering the current output
fn shift_forward(
    track: &mut Track,
    cur: SlotId,
    same_if_bounce: bool,
    removal: Removal,
) -> Option<SchedulerOutcome> {
    match track.chain.next(cur) {
        Some(next) => {
            let out = std::mem::take(&mut track.output);
            if let Some(slot) = track.chain.get_mut(next) {
                slot.pending.append(out);
                slot.new_data = true;
            }
            track.cursor = Some(next);
            remove_slots(track, cur, removal);
            None
        }
        None => {
            // output of the tail has nowhere to go
            track.output.clear();
            if removal != Removal::Keep {
                remove_slots(track, cur, removal);
                return Some(finish(track));
            }
            if same_if_bounce {
                return None;
            }
            match track.chain.prev(cur) {
                Some(prev) => {
                    land_backward(track, prev);
                    None
                }
                None => Some(finish(track)),
            }
        }
    }
}

/// Move towards the head, optionally handing data back upstream
fn shift_backward(
    track: &mut Track,
    cur: SlotId,
    back: Option<Vec<u8>>,
) -> Option<SchedulerOutcome> {
    match track.chain.prev(cur) {
        Some(prev) => {
            if let Some(data) = back {
                if let Some(slot) = track.chain.get_mut(prev) {
                    slot.pending.append(data);
                    slot.new_data = true;
                }
            }
            land_backward(track, prev);
            None
        }
        None => {
            warn!(
                track = %track.id(),
                filter = %slot_name(track, cur),
                "chain head requires more input data, finishing"
            );
            Some(finish(track))
        }
    }
}

/// Place the cursor after a backward move.
///
/// A slot that last returned `Ok` already consumed its input; with nothing
/// pending it can't produce anything, so it is passed over (unless it is
/// the head, which produces data on its own) and the move continues
/// upstream. This stops two neighbours from bouncing the cursor between
/// them without moving any data.
fn land_backward(track: &mut Track, target: SlotId) {
    let track_id = track.id();
    let mut target = target;
    loop {
        let prev = track.chain.prev(target);
        let Some(slot) = track.chain.get_mut(target) else {
            break;
        };
        let skip = slot.want_input && slot.pending.is_empty() && prev.is_some();
        slot.want_input = false;
        match prev {
            Some(p) if skip => {
                debug!(track = %track_id, filter = %slot.name, "skipping filter waiting for input");
                target = p;
            }
            _ => break,
        }
    }
    track.cursor = Some(target);
}

fn remove_slots(track: &mut Track, cur: SlotId, removal: Removal) {
    let doomed = match removal {
        Removal::Keep => return,
        Removal::Current => vec![cur],
        Removal::Prefix => {
            let mut ids = Vec::new();
            for id in track.chain.ids() {
                ids.push(id);
                if id == cur {
                    break;
                }
            }
            ids
        }
    };

    for id in doomed {
        if let Some(slot) = track.chain.remove(id) {
            close_slot(track, id, slot);
        }
    }
    track.chain_version += 1;
    track.refresh_head();
    debug!(track = %track.id(), chain = %track.chain_string(None), "chain after removal");
}

fn close_slot(track: &mut Track, id: SlotId, slot: FilterSlot) {
    let FilterSlot {
        name,
        instance,
        opened,
        elapsed,
        ..
    } = slot;
    track.timings.push((Arc::clone(&name), elapsed));
    if !opened {
        return;
    }
    if let Some(mut instance) = instance {
        let mut ctx = FilterContext::new(track, id, Arc::clone(&name));
        instance.close(&mut ctx);
    }
    debug!(track = %track.id(), filter = %name, "closed filter");
}

fn fail(track: &mut Track, err: TrackError) -> SchedulerOutcome {
    let filter = track.cursor.map(|id| slot_name(track, id));
    match err {
        TrackError::ForcedStop => {
            info!(track = %track.id(), "track stopped");
        }
        _ => {
            error!(
                track = %track.id(),
                filter = filter.as_deref().unwrap_or("-"),
                code = err.error_code(),
                error = %err,
                "track failed"
            );
            if let Err(e) = track.dict.set_if_absent("error", DictValue::Int(1)) {
                warn!(track = %track.id(), error = %e, "can't record error");
            }
        }
    }
    track.last_error = Some(err);
    teardown(track, SchedulerOutcome::Failed)
}

fn finish(track: &mut Track) -> SchedulerOutcome {
    teardown(track, SchedulerOutcome::Finished)
}

/// Tear down a track that is not being driven
pub(crate) fn abort(track: &mut Track, err: TrackError) {
    fail(track, err);
}

/// Close every remaining slot in chain order and mark the track complete
fn teardown(track: &mut Track, outcome: SchedulerOutcome) -> SchedulerOutcome {
    track.input.clear();
    track.output.clear();
    debug!(track = %track.id(), "closing...");
    for id in track.chain.ids() {
        if let Some(slot) = track.chain.remove(id) {
            close_slot(track, id, slot);
        }
    }
    track.cursor = None;
    track.state = match outcome {
        SchedulerOutcome::Failed => TrackState::Failed,
        _ => TrackState::Finished,
    };
    track.outcome = Some(outcome);
    track.finished_at = Some(Utc::now());

    print_time(track);
    info!(track = %track.id(), outcome = %outcome, steps = track.steps, "track closed");
    if let Some(monitor) = track.monitor.clone() {
        monitor.on_close(&track.report());
    }
    outcome
}

/// Log how processing time was shared between filters
fn print_time(track: &Track) {
    let total: Duration = track.timings.iter().map(|(_, d)| *d).sum();
    if total.is_zero() {
        return;
    }
    let shares = track
        .timings
        .iter()
        .map(|(name, d)| {
            format!(
                "{}: {:.6} ({}%)",
                name,
                d.as_secs_f64(),
                d.as_micros() * 100 / total.as_micros().max(1)
            )
        })
        .collect::<Vec<_>>()
        .join(", ");
    debug!(track = %track.id(), "time: {:.6}.  {}", total.as_secs_f64(), shares);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::error::Result;
    use crate::filter::{Filter, FilterInstance};
    use crate::registry::ModuleRegistry;
    use crate::track::{TrackId, TrackKind};

    /// Emits `count` one-byte chunks, then `Done`
    struct Counter {
        count: u8,
    }

    struct CounterInstance {
        left: u8,
    }

    impl Filter for Counter {
        fn name(&self) -> &str {
            "test.counter"
        }

        fn open(&self, _ctx: &mut FilterContext<'_>) -> Result<Opened> {
            Ok(Opened::new(CounterInstance { left: self.count }))
        }
    }

    impl FilterInstance for CounterInstance {
        fn process(&mut self, ctx: &mut FilterContext<'_>) -> FilterStatus {
            if self.left == 0 {
                return FilterStatus::Done;
            }
            ctx.set_output(vec![self.left]);
            self.left -= 1;
            FilterStatus::Data
        }
    }

    /// Collects its input into the dictionary entry "seen"
    struct Sink;

    struct SinkInstance {
        seen: i64,
    }

    impl Filter for Sink {
        fn name(&self) -> &str {
            "test.sink"
        }

        fn open(&self, _ctx: &mut FilterContext<'_>) -> Result<Opened> {
            Ok(Opened::new(SinkInstance { seen: 0 }))
        }
    }

    impl FilterInstance for SinkInstance {
        fn process(&mut self, ctx: &mut FilterContext<'_>) -> FilterStatus {
            self.seen += ctx.input().len() as i64;
            ctx.consume_all();
            ctx.set("seen", self.seen);
            if ctx.is_last() {
                return FilterStatus::Done;
            }
            FilterStatus::Ok
        }
    }

    fn registry() -> Arc<ModuleRegistry> {
        let registry = ModuleRegistry::new();
        registry.register(Arc::new(Counter { count: 3 }));
        registry.register(Arc::new(Sink));
        Arc::new(registry)
    }

    fn track(config: EngineConfig) -> Track {
        Track::new(TrackId(7), TrackKind::Convert, registry(), config)
    }

    #[test]
    fn test_drive_to_completion() {
        let mut t = track(EngineConfig::default());
        t.append_filter("test.counter").unwrap();
        t.append_filter("test.sink").unwrap();
        t.start().unwrap();

        assert_eq!(t.drive(), SchedulerOutcome::Finished);
        assert_eq!(t.state(), TrackState::Finished);
        assert_eq!(t.dict().get_int("seen"), Some(3));
        assert!(t.filter_names().is_empty());
    }

    #[test]
    fn test_drive_before_start() {
        let mut t = track(EngineConfig::default());
        t.append_filter("test.sink").unwrap();
        assert_eq!(t.drive(), SchedulerOutcome::Suspended);
        assert_eq!(t.state(), TrackState::Created);
    }

    #[test]
    fn test_completed_track_is_not_reused() {
        let mut t = track(EngineConfig::default());
        t.append_filter("test.counter").unwrap();
        t.append_filter("test.sink").unwrap();
        t.start().unwrap();
        assert_eq!(t.drive(), SchedulerOutcome::Finished);
        let steps = t.steps();
        assert_eq!(t.drive(), SchedulerOutcome::Finished);
        assert_eq!(t.steps(), steps);
        assert!(t.start().is_err());
    }

    #[test]
    fn test_yield_after_step_budget() {
        let config = EngineConfig {
            max_steps_per_drive: Some(2),
            ..EngineConfig::default()
        };
        let mut t = track(config);
        t.append_filter("test.counter").unwrap();
        t.append_filter("test.sink").unwrap();
        t.start().unwrap();

        assert_eq!(t.drive(), SchedulerOutcome::Suspended);
        assert_eq!(t.steps(), 2);
        assert_eq!(t.waker().wake_count(), 1);

        let mut outcome = SchedulerOutcome::Suspended;
        for _ in 0..20 {
            outcome = t.drive();
            if outcome != SchedulerOutcome::Suspended {
                break;
            }
        }
        assert_eq!(outcome, SchedulerOutcome::Finished);
        assert_eq!(t.dict().get_int("seen"), Some(3));
    }

    #[test]
    fn test_single_slot_ok_finishes() {
        let mut t = track(EngineConfig::default());
        t.append_filter("test.sink").unwrap();
        t.start().unwrap();
        // the only slot is the head, so it sees the last flag and completes
        assert_eq!(t.drive(), SchedulerOutcome::Finished);
        assert_eq!(t.dict().get_int("seen"), Some(0));
    }
}
