//! File and standard stream filters
//!
//! `file.in` and `file.stdin` sit at the head of a chain and emit the input
//! in `chunk_size` pieces. `file.out` and `file.stdout` sit at the tail and
//! write everything they receive. File paths come from the track
//! dictionary entries `input` and `output`.

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::error::{Result, TrackError};
use crate::filter::{Filter, FilterInstance, FilterStatus, Opened};
use crate::track::FilterContext;

/// Read the next chunk from `reader` and turn it into a status
fn read_chunk(reader: &mut dyn Read, ctx: &mut FilterContext<'_>) -> FilterStatus {
    if ctx.stop_requested() {
        debug!(filter = ctx.filter_name(), "stop requested, ending input");
        return FilterStatus::LastOut;
    }
    let mut buf = vec![0u8; ctx.config().chunk_size.max(1)];
    match reader.read(&mut buf) {
        Ok(0) => FilterStatus::Done,
        Ok(n) => {
            buf.truncate(n);
            ctx.set_output(buf);
            FilterStatus::Data
        }
        Err(e) if e.kind() == io::ErrorKind::Interrupted => FilterStatus::Data,
        Err(e) => {
            let err = TrackError::SystemError {
                filter: ctx.filter_name().to_string(),
                source: e,
            };
            ctx.report_error(err);
            FilterStatus::SysError
        }
    }
}

/// Write the pending input to `writer`; returns the byte count
fn write_input(writer: &mut dyn Write, ctx: &mut FilterContext<'_>) -> io::Result<usize> {
    let data = ctx.take_input();
    writer.write_all(&data)?;
    Ok(data.len())
}

fn sys_error(ctx: &mut FilterContext<'_>, e: io::Error) -> FilterStatus {
    let err = TrackError::SystemError {
        filter: ctx.filter_name().to_string(),
        source: e,
    };
    ctx.report_error(err);
    FilterStatus::SysError
}

// === file.in ===

/// Reads the file named by the `input` dictionary entry
pub struct FileInput;

struct FileInputInstance {
    file: File,
}

impl Filter for FileInput {
    fn name(&self) -> &str {
        "file.in"
    }

    fn open(&self, ctx: &mut FilterContext<'_>) -> Result<Opened> {
        let path = ctx
            .get_str("input")
            .map(PathBuf::from)
            .ok_or_else(|| TrackError::open_failed(self.name(), "input is not set"))?;
        let file = File::open(&path)
            .map_err(|e| TrackError::open_failed(self.name(), format!("{}: {}", path.display(), e)))?;
        let size = file.metadata().map(|m| m.len()).unwrap_or(0);
        ctx.set("input_size", size as i64);
        info!(track = %ctx.track_id(), file = %path.display(), size, "opened input file");
        Ok(Opened::new(FileInputInstance { file }))
    }
}

impl FilterInstance for FileInputInstance {
    fn process(&mut self, ctx: &mut FilterContext<'_>) -> FilterStatus {
        read_chunk(&mut self.file, ctx)
    }
}

// === file.stdin ===

/// Reads standard input
pub struct StdinInput;

struct StdinInstance {
    stdin: io::Stdin,
}

impl Filter for StdinInput {
    fn name(&self) -> &str {
        "file.stdin"
    }

    fn open(&self, _ctx: &mut FilterContext<'_>) -> Result<Opened> {
        Ok(Opened::new(StdinInstance { stdin: io::stdin() }))
    }
}

impl FilterInstance for StdinInstance {
    fn process(&mut self, ctx: &mut FilterContext<'_>) -> FilterStatus {
        let mut lock = self.stdin.lock();
        read_chunk(&mut lock, ctx)
    }
}

// === file.out ===

/// Writes to the file named by the `output` dictionary entry.
///
/// A file left incomplete when the track fails is removed on close.
pub struct FileOutput;

struct FileOutputInstance {
    path: PathBuf,
    writer: BufWriter<File>,
    written: u64,
    complete: bool,
}

impl Filter for FileOutput {
    fn name(&self) -> &str {
        "file.out"
    }

    fn open(&self, ctx: &mut FilterContext<'_>) -> Result<Opened> {
        let path = ctx
            .get_str("output")
            .map(PathBuf::from)
            .ok_or_else(|| TrackError::open_failed(self.name(), "output is not set"))?;
        let file = File::create(&path)
            .map_err(|e| TrackError::open_failed(self.name(), format!("{}: {}", path.display(), e)))?;
        debug!(track = %ctx.track_id(), file = %path.display(), "created output file");
        Ok(Opened::new(FileOutputInstance {
            path,
            writer: BufWriter::new(file),
            written: 0,
            complete: false,
        }))
    }
}

impl FilterInstance for FileOutputInstance {
    fn process(&mut self, ctx: &mut FilterContext<'_>) -> FilterStatus {
        match write_input(&mut self.writer, ctx) {
            Ok(n) => self.written += n as u64,
            Err(e) => return sys_error(ctx, e),
        }
        if !ctx.is_last() {
            return FilterStatus::Ok;
        }
        if let Err(e) = self.writer.flush() {
            return sys_error(ctx, e);
        }
        self.complete = true;
        ctx.set("output_size", self.written as i64);
        info!(track = %ctx.track_id(), file = %self.path.display(), bytes = self.written, "saved file");
        FilterStatus::Done
    }

    fn close(&mut self, ctx: &mut FilterContext<'_>) {
        if self.complete {
            return;
        }
        // dropping the writer would flush a partial file
        let _ = self.writer.flush();
        match fs::remove_file(&self.path) {
            Ok(()) => warn!(track = %ctx.track_id(), file = %self.path.display(), "removed incomplete file"),
            Err(e) => warn!(track = %ctx.track_id(), file = %self.path.display(), error = %e, "can't remove incomplete file"),
        }
    }
}

// === file.stdout ===

/// Writes to standard output
pub struct StdoutOutput;

struct StdoutInstance {
    stdout: io::Stdout,
}

impl Filter for StdoutOutput {
    fn name(&self) -> &str {
        "file.stdout"
    }

    fn open(&self, _ctx: &mut FilterContext<'_>) -> Result<Opened> {
        Ok(Opened::new(StdoutInstance {
            stdout: io::stdout(),
        }))
    }
}

impl FilterInstance for StdoutInstance {
    fn process(&mut self, ctx: &mut FilterContext<'_>) -> FilterStatus {
        let mut lock = self.stdout.lock();
        if let Err(e) = write_input(&mut lock, ctx) {
            return sys_error(ctx, e);
        }
        if !ctx.is_last() {
            return FilterStatus::Ok;
        }
        if let Err(e) = lock.flush() {
            return sys_error(ctx, e);
        }
        FilterStatus::Done
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::TempDir;

    use crate::config::EngineConfig;
    use crate::registry::ModuleRegistry;
    use crate::track::{SchedulerOutcome, Track, TrackId, TrackKind};

    fn track(chunk_size: usize) -> Track {
        let config = EngineConfig {
            chunk_size,
            ..EngineConfig::default()
        };
        Track::new(
            TrackId(1),
            TrackKind::Convert,
            Arc::new(ModuleRegistry::with_builtins()),
            config,
        )
    }

    #[test]
    fn test_file_copy() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in.bin");
        let output = dir.path().join("out.bin");
        let data: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&input, &data).unwrap();

        let mut t = track(64);
        t.dict_set("input", input.to_str().unwrap()).unwrap();
        t.dict_set("output", output.to_str().unwrap()).unwrap();
        t.append_filter("file.in").unwrap();
        t.append_filter("file.out").unwrap();
        t.start().unwrap();

        assert_eq!(t.drive(), SchedulerOutcome::Finished);
        assert_eq!(std::fs::read(&output).unwrap(), data);
        assert_eq!(t.dict().get_int("input_size"), Some(1000));
        assert_eq!(t.dict().get_int("output_size"), Some(1000));
    }

    #[test]
    fn test_missing_input_fails_open() {
        let dir = TempDir::new().unwrap();
        let mut t = track(64);
        t.dict_set("input", dir.path().join("missing").to_str().unwrap())
            .unwrap();
        t.append_filter("file.in").unwrap();
        t.start().unwrap();

        assert_eq!(t.drive(), SchedulerOutcome::Failed);
        assert_eq!(t.last_error().map(|e| e.error_code()), Some("OPEN_FAILED"));
        assert_eq!(t.dict().get_int("error"), Some(1));
    }

    #[test]
    fn test_incomplete_output_is_removed() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in.bin");
        let output = dir.path().join("out.bin");
        std::fs::write(&input, vec![7u8; 100]).unwrap();

        let mut t = track(10);
        t.dict_set("input", input.to_str().unwrap()).unwrap();
        t.dict_set("output", output.to_str().unwrap()).unwrap();
        t.append_filter("file.in").unwrap();
        t.append_filter("file.out").unwrap();
        t.start().unwrap();

        // file.in, then file.out writes its first chunk
        assert_eq!(t.step(), None);
        assert_eq!(t.step(), None);
        assert!(output.exists());

        t.stop();
        drop(t);
        assert!(!output.exists());
    }
}
