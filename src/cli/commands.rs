//! CLI Command Implementations

use std::path::PathBuf;

use anyhow::{bail, Context};
use tracing::info;

use crate::config::EngineConfig;
use crate::dict::DictValue;
use crate::engine::{Engine, STDOUT};
use crate::host::WorkerPool;
use crate::track::SchedulerOutcome;

/// Options of the `run` command
#[derive(Debug, Default)]
pub struct RunOptions {
    pub input: String,
    pub output: Option<String>,
    pub filters: Vec<String>,
    pub set: Vec<String>,
    pub chunk_size: Option<usize>,
    pub config: Option<PathBuf>,
    pub dict_dump: bool,
}

/// Parse "name=value"; integers become `Int`, anything else `Str`
pub fn parse_assignment(s: &str) -> anyhow::Result<(String, DictValue)> {
    let Some((name, value)) = s.split_once('=') else {
        bail!("expected NAME=VALUE, got '{}'", s);
    };
    if name.is_empty() {
        bail!("empty name in '{}'", s);
    }
    let value = match value.parse::<i64>() {
        Ok(n) => DictValue::Int(n),
        Err(_) => DictValue::Str(value.to_string()),
    };
    Ok((name.to_string(), value))
}

fn load_config(opts: &RunOptions) -> anyhow::Result<EngineConfig> {
    let mut config = match &opts.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("can't load config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(n) = opts.chunk_size {
        config.chunk_size = n;
    }
    Ok(config)
}

/// Build one track, run it on a worker pool and wait for it.
pub fn run(opts: &RunOptions) -> anyhow::Result<()> {
    let config = load_config(opts)?;
    let engine = Engine::new(config.clone());

    let mut track = engine
        .open_input(&opts.input)
        .with_context(|| format!("can't open input {}", opts.input))?;
    for assignment in &opts.set {
        let (name, value) = parse_assignment(assignment)?;
        track
            .dict_set(&name, value)
            .with_context(|| format!("can't set {}", name))?;
    }
    for filter in &opts.filters {
        track
            .append_filter(filter)
            .with_context(|| format!("can't add filter {}", filter))?;
    }
    let output = opts.output.as_deref().unwrap_or(STDOUT);
    engine
        .set_output(&mut track, output)
        .with_context(|| format!("can't open output {}", output))?;

    let pool = WorkerPool::new(config.worker_threads).context("can't start workers")?;
    let ticket = pool.submit(track).context("can't start track")?;
    let report = ticket.wait().context("worker exited before the track completed")?;
    pool.shutdown();

    if opts.dict_dump {
        eprintln!("{}", serde_json::to_string_pretty(&report)?);
    }

    match report.outcome {
        SchedulerOutcome::Finished => {
            info!(track = %report.id, steps = report.steps, "done");
            Ok(())
        }
        _ => bail!(
            "track {} failed: {}",
            report.id,
            report.error.as_deref().unwrap_or("unknown error")
        ),
    }
}

/// Print the registered filters
pub fn list_filters() -> anyhow::Result<()> {
    let engine = Engine::default();
    for name in engine.registry().list_filters() {
        println!("{}", name);
    }
    Ok(())
}
