// src/dag/state_manager.rs

//! Dependency satisfaction and failure propagation over the graph arena.

use tracing::{debug, warn};

use crate::dag::graph::DependencyGraph;
use crate::dag::node::{DependencyEdge, RunState, SpecNode};
use crate::errors::EnvyError;
use crate::trace::{TraceEventKind, Tracer};
use crate::types::{Identity, Phase};

/// An edge that keeps a spec from starting its cursor phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blocker {
    pub dependency: Identity,
    pub needed_by: Phase,
    /// The dependency has failed and will never satisfy the edge.
    pub failed: bool,
}

/// Read/write helpers that look at one node lock at a time.
pub struct StateManager<'a> {
    graph: &'a DependencyGraph,
    tracer: &'a Tracer,
}

impl<'a> StateManager<'a> {
    pub fn new(graph: &'a DependencyGraph, tracer: &'a Tracer) -> Self {
        Self { graph, tracer }
    }

    /// The first edge in `edges` whose dependency has not yet completed the
    /// edge's needed-by phase.
    ///
    /// This is the canonical implementation of the blocking rule; callers
    /// pass only the edges relevant to the phase they want to start.
    pub fn first_unsatisfied(&self, edges: &[DependencyEdge]) -> Option<Blocker> {
        for edge in edges {
            let Some(dep) = self.graph.get(&edge.dependency) else {
                warn!(dependency = %edge.dependency, "edge points at a missing node");
                return Some(Blocker {
                    dependency: edge.dependency.clone(),
                    needed_by: edge.needed_by,
                    failed: false,
                });
            };

            let state = dep.lock();
            if state.satisfies(edge.needed_by) {
                continue;
            }
            return Some(Blocker {
                dependency: edge.dependency.clone(),
                needed_by: edge.needed_by,
                failed: state.run == RunState::Failed,
            });
        }
        None
    }

    /// Fail `parent` because `dependency` failed before satisfying their edge.
    ///
    /// Returns `false` when the parent is already terminal or the edge is
    /// satisfied (or absent), in which case nothing changes.
    pub fn fail_for_dependency(&self, parent: &SpecNode, dependency: &str) -> bool {
        let dependency_completed = match self.graph.get(dependency) {
            Some(dep) => dep.lock().completed,
            None => None,
        };

        let mut state = parent.lock();
        if state.is_terminal() {
            return false;
        }
        let Some(edge) = state.edge_to(dependency) else {
            return false;
        };
        if dependency_completed.is_some_and(|c| c >= edge.needed_by) {
            return false;
        }
        if state.target.is_some_and(|target| target < edge.needed_by) {
            // The edge only matters if the target is raised later; `advance`
            // fails the spec then.
            debug!(
                spec = %parent.identity(),
                dependency = %dependency,
                "dependency failed beyond this spec's target; leaving it be"
            );
            return false;
        }

        let error = EnvyError::DependencyFailed {
            spec: parent.identity().to_string(),
            dependency: dependency.to_string(),
        };
        state.run = RunState::Failed;
        state.blocked_on = None;
        state.failure = Some(error.to_string());
        self.tracer.emit(TraceEventKind::DependencyFailed {
            spec: parent.identity().to_string(),
            dependency: dependency.to_string(),
        });
        drop(state);

        warn!(spec = %parent.identity(), dependency = %dependency, "{error}");
        parent.wake();
        true
    }

    /// Fail, transitively, every dependent of `failed` that still needed it
    /// to progress further.
    ///
    /// Dependents whose edge was already satisfied keep running. Returns the
    /// newly failed identities (excluding `failed` itself).
    pub fn mark_dependents_failed(&self, failed: &str) -> Vec<Identity> {
        let mut stack: Vec<Identity> = vec![failed.to_string()];
        let mut newly_failed = Vec::new();

        while let Some(name) = stack.pop() {
            for parent in self.graph.dependents_of(&name) {
                let Some(node) = self.graph.get(&parent) else {
                    continue;
                };
                if self.fail_for_dependency(&node, &name) {
                    debug!(spec = %parent, dependency = %name, "propagated dependency failure");
                    newly_failed.push(parent.clone());
                    stack.push(parent);
                }
            }
        }

        newly_failed
    }
}
