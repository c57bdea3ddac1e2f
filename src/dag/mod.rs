// src/dag/mod.rs

//! Dependency graph and phase scheduling.
//!
//! - [`graph`] is the arena of spec nodes and their needed-by edges.
//! - [`node`] holds per-spec state and its public read-only views.
//! - [`scheduler`] contains the per-spec phase state machine that decides
//!   which phase may run, when a spec blocks, and when it unblocks.
//! - [`state_manager`] checks edge satisfaction and propagates failures.
//! - [`target`] implements closure-wide target extension.

pub mod graph;
pub mod node;
pub mod scheduler;
pub mod state_manager;
pub mod target;

pub use graph::{DependencyGraph, EdgeStatus};
pub use node::{DependencyEdge, SpecRunState, SpecStatus};
pub use scheduler::{Admission, Scheduler};
