//! Chain Mutation Tests
//!
//! Filters discovered and inserted while the track runs.

mod common;

use std::sync::Arc;

use parking_lot::Mutex;
use pretty_assertions::assert_eq;

use common::{entries, joined, new_log, pipe, registry, sink, source, started_track, Log, Scripted};
use trackflow::{EngineConfig, Filter, FilterStatus, SchedulerOutcome};

/// Uppercases its input
fn upper(name: &str, log: &Log) -> Arc<dyn Filter> {
    Scripted::new(name, log, |_, ctx| {
        let data = ctx.take_input();
        ctx.set_output(data.to_ascii_uppercase());
        if ctx.is_last() {
            FilterStatus::Done
        } else {
            FilterStatus::Ok
        }
    })
}

/// Passthrough that inserts `decoder` after itself on its first call
fn demuxer(log: &Log, decoder: &'static str) -> Arc<dyn Filter> {
    Scripted::new("demux", log, move |n, ctx| {
        if n == 0 {
            if let Err(e) = ctx.insert_after_current(decoder) {
                ctx.report_error(e);
                return FilterStatus::Error;
            }
        }
        let data = ctx.take_input();
        ctx.set_output(data);
        if ctx.is_last() {
            FilterStatus::Done
        } else {
            FilterStatus::Ok
        }
    })
}

// === Runtime Insertion Tests ===

#[test]
fn test_demuxer_inserts_decoder() {
    let log = new_log();
    let (out, got) = sink("sink", &log);
    let reg = registry(vec![
        source("read", &log, &[b"ab", b"cd"]),
        demuxer(&log, "upper"),
        upper("upper", &log),
        out,
    ]);
    let mut track = started_track(reg, EngineConfig::default(), &["read", "demux", "sink"]);

    assert_eq!(track.step(), None);
    assert_eq!(track.step(), None);
    assert_eq!(track.filter_names(), vec!["read", "demux", "upper", "sink"]);
    assert_eq!(track.chain_string(None), "read -> demux -> *upper -> sink");

    assert_eq!(track.drive(), SchedulerOutcome::Finished);
    assert_eq!(joined(&got), b"ABCD".to_vec());
    let log = entries(&log);
    assert_eq!(
        &log[..4],
        &["open read", "open demux", "open upper", "open sink"]
    );
}

#[test]
fn test_insertion_keeps_upstream_position() {
    let log = new_log();
    let tapped = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&tapped);
    let tap = Scripted::new("tap", &log, move |_, ctx| {
        let data = ctx.take_input();
        seen.lock().extend_from_slice(&data);
        ctx.set_output(data);
        if ctx.is_last() {
            FilterStatus::Done
        } else {
            FilterStatus::Ok
        }
    });
    let mid = Scripted::new("mid", &log, |n, ctx| {
        if n == 1 && ctx.insert_after_current("tap").is_err() {
            return FilterStatus::Error;
        }
        let data = ctx.take_input();
        ctx.set_output(data);
        if ctx.is_last() {
            FilterStatus::Done
        } else {
            FilterStatus::Ok
        }
    });
    let (out, got) = sink("sink", &log);
    let reg = registry(vec![source("src", &log, &[b"1", b"2", b"3"]), mid, tap, out]);
    let mut track = started_track(reg, EngineConfig::default(), &["src", "mid", "sink"]);

    assert_eq!(track.drive(), SchedulerOutcome::Finished);
    assert_eq!(joined(&got), b"123".to_vec());
    assert_eq!(*tapped.lock(), b"23".to_vec());
}

#[test]
fn test_insert_before_current() {
    let log = new_log();
    let mid = Scripted::new("mid", &log, |n, ctx| {
        if n == 0 && ctx.insert_before_current("tag").is_err() {
            return FilterStatus::Error;
        }
        let data = ctx.take_input();
        ctx.set_output(data);
        if ctx.is_last() {
            FilterStatus::Done
        } else {
            FilterStatus::Ok
        }
    });
    let (out, got) = sink("sink", &log);
    let reg = registry(vec![
        source("src", &log, &[b"a", b"b"]),
        mid,
        pipe("tag", &log),
        out,
    ]);
    let mut track = started_track(reg, EngineConfig::default(), &["src", "mid", "sink"]);

    assert_eq!(track.step(), None);
    assert_eq!(track.step(), None);
    assert_eq!(track.filter_names(), vec!["src", "tag", "mid", "sink"]);

    assert_eq!(track.drive(), SchedulerOutcome::Finished);
    assert_eq!(joined(&got), b"ab".to_vec());
    assert!(entries(&log).contains(&"close tag".to_string()));
}

#[test]
fn test_lazy_module_loader() {
    let log = new_log();
    let (out, got) = sink("sink", &log);
    let reg = registry(vec![
        source("read", &log, &[b"xyz"]),
        demuxer(&log, "dyn.upper"),
        out,
    ]);
    let loader_log = Arc::clone(&log);
    reg.register_loader(
        "dyn",
        Box::new(move |name: &str| (name == "dyn.upper").then(|| upper(name, &loader_log))),
    );
    assert!(!reg.has_filter("dyn.upper"));
    let mut track = started_track(Arc::clone(&reg), EngineConfig::default(), &["read", "demux", "sink"]);

    assert_eq!(track.drive(), SchedulerOutcome::Finished);
    assert_eq!(joined(&got), b"XYZ".to_vec());
    assert!(reg.has_filter("dyn.upper"));
}

// === Insertion Failure Tests ===

#[test]
fn test_unknown_filter_fails_track() {
    let log = new_log();
    let (out, _) = sink("sink", &log);
    let reg = registry(vec![
        source("read", &log, &[b"data"]),
        demuxer(&log, "codec.missing"),
        out,
    ]);
    let mut track = started_track(reg, EngineConfig::default(), &["read", "demux", "sink"]);

    assert_eq!(track.drive(), SchedulerOutcome::Failed);
    assert_eq!(
        track.last_error().map(|e| e.error_code()),
        Some("FILTER_NOT_FOUND")
    );
}

#[test]
fn test_filter_limit_applies_at_runtime() {
    let log = new_log();
    let results = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&results);
    let greedy = Scripted::new("greedy", &log, move |n, ctx| {
        if n == 0 {
            for _ in 0..2 {
                let r = ctx.insert_after_current("extra");
                seen.lock().push(r.map(|_| ()).map_err(|e| e.error_code()));
            }
        }
        let data = ctx.take_input();
        ctx.set_output(data);
        if ctx.is_last() {
            FilterStatus::Done
        } else {
            FilterStatus::Ok
        }
    });
    let (out, _) = sink("sink", &log);
    let reg = registry(vec![greedy, pipe("extra", &log), out]);
    let config = EngineConfig {
        max_filters: 3,
        ..EngineConfig::default()
    };
    let mut track = started_track(reg, config, &["greedy", "sink"]);

    assert_eq!(track.drive(), SchedulerOutcome::Finished);
    assert_eq!(*results.lock(), vec![Ok(()), Err("TOO_MANY_FILTERS")]);
}

// === Host-side Mutation Tests ===

#[test]
fn test_insert_at_head_before_start() {
    let log = new_log();
    let (out, got) = sink("sink", &log);
    let reg = registry(vec![source("src", &log, &[b"q"]), out]);
    let engine = trackflow::Engine::with_registry(reg, EngineConfig::default());
    let mut track = engine.create(trackflow::TrackKind::Playback);
    track.append_filter("sink").unwrap();
    let head = track.insert_at_head("src").unwrap();
    track.start().unwrap();

    assert_eq!(track.current(), Some(head));
    assert_eq!(track.chain_string(None), "*src -> sink");
    assert_eq!(track.drive(), SchedulerOutcome::Finished);
    assert_eq!(joined(&got), b"q".to_vec());
    assert!(!track.contains_slot(head));
    assert!(track.append_filter("sink").is_err());
}
