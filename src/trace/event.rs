// src/trace/event.rs

//! Trace event types.
//!
//! Events are serialized as JSON Lines with the kind flattened into the
//! object:
//!
//! ```json
//! {"ts":"2025-01-15T10:00:00Z","event":"phase_start","spec":"local.a@v1","phase":"asset_fetch","phase_num":2}
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Identity, Phase};

/// A timestamped, immutable trace record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub ts: DateTime<Utc>,

    #[serde(flatten)]
    pub kind: TraceEventKind,
}

impl TraceEvent {
    pub fn now(kind: TraceEventKind) -> Self {
        Self {
            ts: Utc::now(),
            kind,
        }
    }
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.ts.format("%H:%M:%S%.3f"), self.kind)
    }
}

/// Event payloads. Serialized with internal tagging on `event`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceEventKind {
    SpecRegistered {
        spec: Identity,
    },

    PhaseStart {
        spec: Identity,
        phase: Phase,
        phase_num: u8,
    },

    PhaseComplete {
        spec: Identity,
        phase: Phase,
        phase_num: u8,
        duration_ms: u64,
    },

    PhaseFailed {
        spec: Identity,
        phase: Phase,
        phase_num: u8,
        error: String,
    },

    /// The spec cannot start `phase_num` until `dependency` reaches
    /// `needed_by_num`.
    Blocked {
        spec: Identity,
        phase_num: u8,
        dependency: Identity,
        needed_by_num: u8,
    },

    Unblocked {
        spec: Identity,
        phase_num: u8,
        dependency: Identity,
    },

    DependencyAdded {
        spec: Identity,
        dependency: Identity,
        needed_by: Phase,
        needed_by_num: u8,
    },

    DependencyFailed {
        spec: Identity,
        dependency: Identity,
    },

    TargetExtended {
        spec: Identity,
        previous_target_num: Option<u8>,
        new_target_num: u8,
    },

    /// `file` is `None` for entry-level decisions (the completion marker).
    CacheHit {
        spec: Identity,
        variant: String,
        file: Option<String>,
    },

    CacheMiss {
        spec: Identity,
        variant: String,
        file: Option<String>,
    },

    CacheCorrupt {
        spec: Identity,
        variant: String,
        file: String,
        expected: String,
        actual: String,
    },

    LockAcquired {
        spec: Identity,
        variant: String,
        wait_ms: u64,
    },

    LockReleased {
        spec: Identity,
        variant: String,
        held_ms: u64,
    },

    FetchFileStart {
        spec: Identity,
        file: String,
        source: String,
    },

    FetchFileComplete {
        spec: Identity,
        file: String,
        bytes: u64,
        duration_ms: u64,
    },
}

impl TraceEventKind {
    pub fn phase_start(spec: &str, phase: Phase) -> Self {
        TraceEventKind::PhaseStart {
            spec: spec.to_string(),
            phase,
            phase_num: phase.num(),
        }
    }

    pub fn phase_complete(spec: &str, phase: Phase, duration_ms: u64) -> Self {
        TraceEventKind::PhaseComplete {
            spec: spec.to_string(),
            phase,
            phase_num: phase.num(),
            duration_ms,
        }
    }

    /// Kind name as written to the `event` field.
    pub fn name(&self) -> &'static str {
        match self {
            TraceEventKind::SpecRegistered { .. } => "spec_registered",
            TraceEventKind::PhaseStart { .. } => "phase_start",
            TraceEventKind::PhaseComplete { .. } => "phase_complete",
            TraceEventKind::PhaseFailed { .. } => "phase_failed",
            TraceEventKind::Blocked { .. } => "blocked",
            TraceEventKind::Unblocked { .. } => "unblocked",
            TraceEventKind::DependencyAdded { .. } => "dependency_added",
            TraceEventKind::DependencyFailed { .. } => "dependency_failed",
            TraceEventKind::TargetExtended { .. } => "target_extended",
            TraceEventKind::CacheHit { .. } => "cache_hit",
            TraceEventKind::CacheMiss { .. } => "cache_miss",
            TraceEventKind::CacheCorrupt { .. } => "cache_corrupt",
            TraceEventKind::LockAcquired { .. } => "lock_acquired",
            TraceEventKind::LockReleased { .. } => "lock_released",
            TraceEventKind::FetchFileStart { .. } => "fetch_file_start",
            TraceEventKind::FetchFileComplete { .. } => "fetch_file_complete",
        }
    }

    /// The spec this event is about.
    pub fn spec(&self) -> &str {
        match self {
            TraceEventKind::SpecRegistered { spec }
            | TraceEventKind::PhaseStart { spec, .. }
            | TraceEventKind::PhaseComplete { spec, .. }
            | TraceEventKind::PhaseFailed { spec, .. }
            | TraceEventKind::Blocked { spec, .. }
            | TraceEventKind::Unblocked { spec, .. }
            | TraceEventKind::DependencyAdded { spec, .. }
            | TraceEventKind::DependencyFailed { spec, .. }
            | TraceEventKind::TargetExtended { spec, .. }
            | TraceEventKind::CacheHit { spec, .. }
            | TraceEventKind::CacheMiss { spec, .. }
            | TraceEventKind::CacheCorrupt { spec, .. }
            | TraceEventKind::LockAcquired { spec, .. }
            | TraceEventKind::LockReleased { spec, .. }
            | TraceEventKind::FetchFileStart { spec, .. }
            | TraceEventKind::FetchFileComplete { spec, .. } => spec,
        }
    }
}

/// Human-readable single-line rendering used by the stderr sink.
impl fmt::Display for TraceEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceEventKind::SpecRegistered { spec } => write!(f, "[{spec}] registered"),
            TraceEventKind::PhaseStart { spec, phase, .. } => {
                write!(f, "[{spec}] {phase} started")
            }
            TraceEventKind::PhaseComplete {
                spec,
                phase,
                duration_ms,
                ..
            } => write!(f, "[{spec}] {phase} complete ({duration_ms} ms)"),
            TraceEventKind::PhaseFailed {
                spec, phase, error, ..
            } => write!(f, "[{spec}] {phase} FAILED: {error}"),
            TraceEventKind::Blocked {
                spec,
                phase_num,
                dependency,
                needed_by_num,
            } => write!(
                f,
                "[{spec}] blocked before phase {phase_num} on {dependency} (needs phase {needed_by_num})"
            ),
            TraceEventKind::Unblocked {
                spec,
                phase_num,
                dependency,
            } => write!(f, "[{spec}] unblocked at phase {phase_num} by {dependency}"),
            TraceEventKind::DependencyAdded {
                spec,
                dependency,
                needed_by,
                ..
            } => write!(f, "[{spec}] depends on {dependency} (needed by {needed_by})"),
            TraceEventKind::DependencyFailed { spec, dependency } => {
                write!(f, "[{spec}] dependency {dependency} failed")
            }
            TraceEventKind::TargetExtended {
                spec,
                previous_target_num,
                new_target_num,
            } => match previous_target_num {
                Some(prev) => write!(f, "[{spec}] target raised {prev} -> {new_target_num}"),
                None => write!(f, "[{spec}] target set to {new_target_num}"),
            },
            TraceEventKind::CacheHit {
                spec,
                variant,
                file,
            } => match file {
                Some(file) => write!(f, "[{spec}] cache hit {variant}/fetch/{file}"),
                None => write!(f, "[{spec}] cache hit {variant} (complete)"),
            },
            TraceEventKind::CacheMiss {
                spec,
                variant,
                file,
            } => match file {
                Some(file) => write!(f, "[{spec}] cache miss {variant}/fetch/{file}"),
                None => write!(f, "[{spec}] cache miss {variant}"),
            },
            TraceEventKind::CacheCorrupt { spec, file, .. } => {
                write!(f, "[{spec}] cached {file} is corrupt; re-downloading")
            }
            TraceEventKind::LockAcquired {
                spec,
                variant,
                wait_ms,
            } => write!(f, "[{spec}] lock {variant} acquired after {wait_ms} ms"),
            TraceEventKind::LockReleased {
                spec,
                variant,
                held_ms,
            } => write!(f, "[{spec}] lock {variant} released after {held_ms} ms"),
            TraceEventKind::FetchFileStart { spec, file, source } => {
                write!(f, "[{spec}] fetching {file} from {source}")
            }
            TraceEventKind::FetchFileComplete {
                spec,
                file,
                bytes,
                duration_ms,
            } => write!(f, "[{spec}] fetched {file} ({bytes} bytes, {duration_ms} ms)"),
        }
    }
}
