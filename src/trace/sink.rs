// src/trace/sink.rs

//! Trace sinks.
//!
//! Every sink serializes its own writes behind a mutex, so the events of a
//! single writer land in the order they were emitted.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, anyhow};

use super::event::{TraceEvent, TraceEventKind};

/// Destination for trace events.
pub trait TraceSink: Send + Sync + fmt::Debug {
    fn write(&self, event: &TraceEvent) -> Result<()>;

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Human-readable stream, one line per event (stderr by default).
pub struct HumanSink {
    out: Mutex<Box<dyn Write + Send>>,
}

impl HumanSink {
    pub fn stderr() -> Self {
        Self::new(Box::new(std::io::stderr()))
    }

    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }
}

impl fmt::Debug for HumanSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HumanSink").finish_non_exhaustive()
    }
}

impl TraceSink for HumanSink {
    fn write(&self, event: &TraceEvent) -> Result<()> {
        let mut out = self.out.lock().map_err(|_| anyhow!("human sink poisoned"))?;
        writeln!(out, "envy: {event}").context("writing human-readable trace line")?;
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        let mut out = self.out.lock().map_err(|_| anyhow!("human sink poisoned"))?;
        out.flush()?;
        Ok(())
    }
}

/// Machine-readable JSON Lines file, opened for append.
///
/// Each event is written as one complete line and flushed immediately, so a
/// crash leaves at most a truncated final line.
#[derive(Debug)]
pub struct JsonLinesSink {
    path: PathBuf,
    file: Mutex<BufWriter<File>>,
}

impl JsonLinesSink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating trace directory {:?}", parent))?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening trace file {:?}", path))?;

        Ok(Self {
            path,
            file: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TraceSink for JsonLinesSink {
    fn write(&self, event: &TraceEvent) -> Result<()> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');

        let mut file = self.file.lock().map_err(|_| anyhow!("trace file sink poisoned"))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("appending to trace file {:?}", self.path))?;
        file.flush()?;
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        let mut file = self.file.lock().map_err(|_| anyhow!("trace file sink poisoned"))?;
        file.flush()?;
        Ok(())
    }
}

/// In-memory sink, mostly useful for tests and diagnostics.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<TraceEvent>>,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Snapshot of everything recorded so far, in append order.
    pub fn events(&self) -> Vec<TraceEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn kinds(&self) -> Vec<TraceEventKind> {
        self.events().into_iter().map(|e| e.kind).collect()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl TraceSink for MemorySink {
    fn write(&self, event: &TraceEvent) -> Result<()> {
        self.events
            .lock()
            .map_err(|_| anyhow!("memory sink poisoned"))?
            .push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Phase;

    #[test]
    fn json_lines_sink_appends_one_object_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("trace.jsonl");
        let sink = JsonLinesSink::open(&path).unwrap();

        sink.write(&TraceEvent::now(TraceEventKind::SpecRegistered {
            spec: "a@1".into(),
        }))
        .unwrap();
        sink.write(&TraceEvent::now(TraceEventKind::phase_start("a@1", Phase::RecipeFetch)))
            .unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event"], "spec_registered");
        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["event"], "phase_start");
        assert_eq!(second["phase_num"], 0);
    }

    #[test]
    fn human_sink_writes_readable_lines() {
        #[derive(Clone, Default)]
        struct Shared(Arc<Mutex<Vec<u8>>>);
        impl Write for Shared {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let buf = Shared::default();
        let sink = HumanSink::new(Box::new(buf.clone()));
        sink.write(&TraceEvent::now(TraceEventKind::phase_complete(
            "a@1",
            Phase::AssetInstall,
            3,
        )))
        .unwrap();

        let text = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        assert!(text.contains("[a@1] asset_install complete (3 ms)"), "{text}");
    }
}
