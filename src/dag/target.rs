// src/dag/target.rs

//! Target extension: raise the target watermark of a set of roots and of
//! their whole dependency closure before any driver starts waiting.
//!
//! Raising targets one hop at a time (as [`Scheduler::advance`] does for a
//! lazily requested dependency) turns a chain into serial execution. Running
//! this first lets every closure member start with its final target.

use std::collections::{HashMap, VecDeque};

use tracing::debug;

use crate::dag::scheduler::Scheduler;
use crate::errors::{EnvyError, Result};
use crate::types::{Identity, Phase};

impl Scheduler {
    /// Raise `roots` to `phase` and every transitive dependency to the
    /// needed-by phase of the edges reaching it.
    ///
    /// Watermarks are first computed to a fixpoint, then applied once per
    /// spec, so a spec reached through several paths (a diamond) gets a
    /// single raise to the maximum required phase. Specs outside the closure
    /// are never touched. Returns the raised specs and their new targets in
    /// the order they were first reached.
    pub fn extend_to<S: AsRef<str>>(&self, roots: &[S], phase: Phase) -> Result<Vec<(Identity, Phase)>> {
        for root in roots {
            let root = root.as_ref();
            if !self.graph().contains(root) {
                return Err(EnvyError::SpecNotFound(root.to_string()));
            }
        }

        let mut watermarks: HashMap<Identity, Option<Phase>> = HashMap::new();
        let mut order: Vec<Identity> = Vec::new();
        let mut queue: VecDeque<(Identity, Phase)> = roots
            .iter()
            .map(|r| (r.as_ref().to_string(), phase))
            .collect();

        while let Some((spec, wanted)) = queue.pop_front() {
            let current = *watermarks.entry(spec.clone()).or_insert_with(|| {
                self.status(&spec).and_then(|status| status.target)
            });
            if current.is_some_and(|c| c >= wanted) {
                continue;
            }

            if !order.contains(&spec) {
                order.push(spec.clone());
            }
            watermarks.insert(spec.clone(), Some(wanted));

            for edge in self.graph().dependencies_of(&spec) {
                queue.push_back((edge.dependency, edge.needed_by));
            }
        }

        let mut raised = Vec::new();
        for spec in order {
            let Some(Some(target)) = watermarks.get(&spec).copied() else {
                continue;
            };
            if self.raise_target(&spec, target)? {
                raised.push((spec, target));
            }
        }

        debug!(roots = roots.len(), raised = raised.len(), target = %phase, "targets extended");
        Ok(raised)
    }
}
