//! Scripted filters shared by the integration tests
//!
//! A scripted filter is a name plus a closure called with the index of the
//! call and the filter context. `open` and `close` are recorded in a shared
//! log so tests can check ordering.

#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;

use trackflow::{
    EngineConfig, Filter, FilterContext, FilterInstance, FilterStatus, ModuleRegistry, Opened,
    Track, TrackKind,
};

pub type Log = Arc<Mutex<Vec<String>>>;

pub type ProcessFn = dyn Fn(usize, &mut FilterContext<'_>) -> FilterStatus + Send + Sync;

pub fn new_log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(log: &Log) -> Vec<String> {
    log.lock().clone()
}

pub struct Scripted {
    name: String,
    log: Log,
    skip: bool,
    process: Arc<ProcessFn>,
}

struct ScriptedInstance {
    name: String,
    log: Log,
    calls: usize,
    process: Arc<ProcessFn>,
}

impl Scripted {
    pub fn new(
        name: &str,
        log: &Log,
        process: impl Fn(usize, &mut FilterContext<'_>) -> FilterStatus + Send + Sync + 'static,
    ) -> Arc<dyn Filter> {
        Arc::new(Self {
            name: name.to_string(),
            log: Arc::clone(log),
            skip: false,
            process: Arc::new(process),
        })
    }

    /// Filter whose `open` returns `Skip`
    pub fn skipping(name: &str, log: &Log) -> Arc<dyn Filter> {
        Arc::new(Self {
            name: name.to_string(),
            log: Arc::clone(log),
            skip: true,
            process: Arc::new(|_: usize, _: &mut FilterContext<'_>| FilterStatus::Error),
        })
    }
}

impl Filter for Scripted {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&self, _ctx: &mut FilterContext<'_>) -> trackflow::Result<Opened> {
        self.log.lock().push(format!("open {}", self.name));
        if self.skip {
            return Ok(Opened::Skip);
        }
        Ok(Opened::new(ScriptedInstance {
            name: self.name.clone(),
            log: Arc::clone(&self.log),
            calls: 0,
            process: Arc::clone(&self.process),
        }))
    }
}

impl FilterInstance for ScriptedInstance {
    fn process(&mut self, ctx: &mut FilterContext<'_>) -> FilterStatus {
        let n = self.calls;
        self.calls += 1;
        (self.process)(n, ctx)
    }

    fn close(&mut self, _ctx: &mut FilterContext<'_>) {
        self.log.lock().push(format!("close {}", self.name));
    }
}

/// Emits `chunks` one per call, then `Done`
pub fn source(name: &str, log: &Log, chunks: &[&[u8]]) -> Arc<dyn Filter> {
    let chunks: Vec<Vec<u8>> = chunks.iter().map(|c| c.to_vec()).collect();
    Scripted::new(name, log, move |n, ctx| match chunks.get(n) {
        Some(chunk) => {
            ctx.set_output(chunk.clone());
            FilterStatus::Data
        }
        None => FilterStatus::Done,
    })
}

/// Forwards its input unchanged, completing on the last chunk
pub fn pipe(name: &str, log: &Log) -> Arc<dyn Filter> {
    Scripted::new(name, log, |_, ctx| {
        let data = ctx.take_input();
        ctx.set_output(data);
        if ctx.is_last() {
            FilterStatus::Done
        } else {
            FilterStatus::Ok
        }
    })
}

/// What a sink saw on one call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Received {
    pub data: Vec<u8>,
    pub last: bool,
}

/// Records every call, completing on the last chunk
pub fn sink(name: &str, log: &Log) -> (Arc<dyn Filter>, Arc<Mutex<Vec<Received>>>) {
    let received = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&received);
    let filter = Scripted::new(name, log, move |_, ctx| {
        let data = ctx.take_input();
        let last = ctx.is_last();
        seen.lock().push(Received { data, last });
        if last {
            FilterStatus::Done
        } else {
            FilterStatus::Ok
        }
    });
    (filter, received)
}

/// Concatenated data of all received chunks
pub fn joined(received: &Arc<Mutex<Vec<Received>>>) -> Vec<u8> {
    received
        .lock()
        .iter()
        .flat_map(|r| r.data.iter().copied())
        .collect()
}

pub fn registry(filters: Vec<Arc<dyn Filter>>) -> Arc<ModuleRegistry> {
    let registry = ModuleRegistry::new();
    for filter in filters {
        registry.register(filter);
    }
    Arc::new(registry)
}

/// Started track over `names`
pub fn started_track(registry: Arc<ModuleRegistry>, config: EngineConfig, names: &[&str]) -> Track {
    let engine = trackflow::Engine::with_registry(registry, config);
    let mut track = engine.create(TrackKind::Convert);
    for name in names {
        track.append_filter(name).unwrap();
    }
    track.start().unwrap();
    track
}
