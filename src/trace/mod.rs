// src/trace/mod.rs

//! Structured trace emitter.
//!
//! - [`event`] defines the immutable, timestamped event records.
//! - [`sink`] contains the destinations: human-readable stream, JSON Lines
//!   file, and an in-memory sink.
//!
//! A [`Tracer`] fans each event out to every configured sink. It is cheap to
//! clone and is shared by the scheduler, cache store and fetch coordinator.

pub mod event;
pub mod sink;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::warn;

use crate::errors::{EnvyError, Result};

pub use event::{TraceEvent, TraceEventKind};
pub use sink::{HumanSink, JsonLinesSink, MemorySink, TraceSink};

/// One destination parsed from a sink specification string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkTarget {
    Stderr,
    File(PathBuf),
}

/// Parse a comma-separated sink specification such as
/// `"stderr,file:/tmp/envy-trace.jsonl"`.
///
/// Empty segments are ignored; an empty spec yields no sinks.
pub fn parse_sink_spec(spec: &str) -> Result<Vec<SinkTarget>> {
    let mut targets = Vec::new();

    for part in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let target = match part.split_once(':') {
            None if part.eq_ignore_ascii_case("stderr") => SinkTarget::Stderr,
            Some(("file", path)) if !path.trim().is_empty() => {
                SinkTarget::File(PathBuf::from(path.trim()))
            }
            _ => {
                return Err(EnvyError::ConfigError(format!(
                    "invalid trace sink '{part}' (expected \"stderr\" or \"file:<path>\")"
                )));
            }
        };
        if !targets.contains(&target) {
            targets.push(target);
        }
    }

    Ok(targets)
}

/// Fan-out handle over zero or more sinks.
#[derive(Clone, Default)]
pub struct Tracer {
    sinks: Arc<Vec<Arc<dyn TraceSink>>>,
}

impl fmt::Debug for Tracer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracer")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl Tracer {
    /// A tracer that drops every event.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn new(sinks: Vec<Arc<dyn TraceSink>>) -> Self {
        Self {
            sinks: Arc::new(sinks),
        }
    }

    /// Build a tracer from a sink specification string.
    pub fn from_spec(spec: &str) -> Result<Self> {
        let mut sinks: Vec<Arc<dyn TraceSink>> = Vec::new();
        for target in parse_sink_spec(spec)? {
            match target {
                SinkTarget::Stderr => sinks.push(Arc::new(HumanSink::stderr())),
                SinkTarget::File(path) => sinks.push(Arc::new(JsonLinesSink::open(path)?)),
            }
        }
        Ok(Self::new(sinks))
    }

    /// Return a tracer that also delivers to `sink`.
    pub fn with_sink(&self, sink: Arc<dyn TraceSink>) -> Self {
        let mut sinks: Vec<_> = self.sinks.iter().cloned().collect();
        sinks.push(sink);
        Self::new(sinks)
    }

    pub fn is_enabled(&self) -> bool {
        !self.sinks.is_empty()
    }

    /// Stamp `kind` with the current time and deliver it to every sink.
    ///
    /// Sink failures are logged and otherwise ignored.
    pub fn emit(&self, kind: TraceEventKind) {
        if self.sinks.is_empty() {
            return;
        }
        let event = TraceEvent::now(kind);
        for sink in self.sinks.iter() {
            if let Err(err) = sink.write(&event) {
                warn!(event = event.kind.name(), error = %err, "trace sink write failed");
            }
        }
    }

    pub fn flush(&self) {
        for sink in self.sinks.iter() {
            if let Err(err) = sink.flush() {
                warn!(error = %err, "trace sink flush failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_comma_separated_targets() {
        let targets = parse_sink_spec("stderr, file:/tmp/t.jsonl,,stderr").unwrap();
        assert_eq!(
            targets,
            vec![
                SinkTarget::Stderr,
                SinkTarget::File(PathBuf::from("/tmp/t.jsonl"))
            ]
        );
        assert!(parse_sink_spec("").unwrap().is_empty());
    }

    #[test]
    fn rejects_unknown_targets() {
        assert!(matches!(
            parse_sink_spec("syslog"),
            Err(EnvyError::ConfigError(_))
        ));
        assert!(parse_sink_spec("file:").is_err());
    }

    #[test]
    fn fans_out_to_every_sink_in_order() {
        let a = MemorySink::new();
        let b = MemorySink::new();
        let tracer = Tracer::disabled().with_sink(a.clone()).with_sink(b.clone());

        for i in 0..5 {
            tracer.emit(TraceEventKind::SpecRegistered {
                spec: format!("s{i}@1"),
            });
        }

        let specs_a: Vec<_> = a.kinds().iter().map(|k| k.spec().to_string()).collect();
        let specs_b: Vec<_> = b.kinds().iter().map(|k| k.spec().to_string()).collect();
        assert_eq!(specs_a, vec!["s0@1", "s1@1", "s2@1", "s3@1", "s4@1"]);
        assert_eq!(specs_a, specs_b);
    }
}
