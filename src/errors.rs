// src/errors.rs

//! Crate-wide error types and helpers.

use thiserror::Error;

use crate::types::{Identity, Phase};

#[derive(Error, Debug)]
pub enum EnvyError {
    #[error("Parse error in spec '{spec}': {message}")]
    Parse { spec: String, message: String },

    #[error("Fetch failed for '{spec}': {source}")]
    Fetch {
        spec: Identity,
        #[source]
        source: FetchError,
    },

    /// A cached file failed re-verification. Recovered by re-downloading;
    /// only ever logged.
    #[error("Cached file '{file}' of '{spec}' failed verification")]
    CorruptionDetected { spec: Identity, file: String },

    #[error("Phase {phase} of '{spec}' failed: {message}")]
    PhaseExecution {
        spec: Identity,
        phase: Phase,
        message: String,
    },

    #[error("Spec '{spec}' cannot progress: dependency '{dependency}' failed")]
    DependencyFailed { spec: Identity, dependency: Identity },

    #[error("Spec not found: {0}")]
    SpecNotFound(String),

    #[error("Cycle detected in dependency graph: {0}")]
    DagCycle(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EnvyError {
    /// Graph errors abort the whole invocation before any work starts.
    pub fn is_graph_error(&self) -> bool {
        matches!(self, EnvyError::SpecNotFound(_) | EnvyError::DagCycle(_))
    }

    pub fn parse(spec: impl Into<String>, message: impl Into<String>) -> Self {
        EnvyError::Parse {
            spec: spec.into(),
            message: message.into(),
        }
    }
}

/// Why a single declared file could not be fetched.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("source '{source_uri}' for '{file}' is unreachable: {message}")]
    Unreachable {
        file: String,
        source_uri: String,
        message: String,
    },

    #[error("'{file}' hash mismatch after download (expected {expected}, got {actual})")]
    HashMismatch {
        file: String,
        expected: String,
        actual: String,
    },

    #[error("IO error on '{file}': {source}")]
    Io {
        file: String,
        #[source]
        source: std::io::Error,
    },
}

impl FetchError {
    /// Name of the offending file inside `fetch/`.
    pub fn file(&self) -> &str {
        match self {
            FetchError::Unreachable { file, .. }
            | FetchError::HashMismatch { file, .. }
            | FetchError::Io { file, .. } => file,
        }
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, EnvyError>;
