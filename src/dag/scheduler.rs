// src/dag/scheduler.rs

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::SpecDecl;
use crate::dag::graph::DependencyGraph;
use crate::dag::node::{DependencyEdge, RunState, SpecNode, SpecStatus};
use crate::dag::state_manager::StateManager;
use crate::errors::{EnvyError, Result};
use crate::trace::{TraceEventKind, Tracer};
use crate::types::{Identity, Phase};

/// Outcome of a single [`Scheduler::advance`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// The phase was admitted and marked running; the caller must execute
    /// it and report back through `complete_phase` or `fail`.
    Run(Phase),
    /// The cursor phase waits on `dependency` reaching `needed_by`.
    Blocked {
        dependency: Identity,
        needed_by: Phase,
    },
    /// The spec reached its target watermark and has nothing to do until
    /// the target is raised.
    Idle,
    /// A phase is already running.
    Busy,
    Done,
    Failed,
}

/// Drives every registered spec through the phase lifecycle.
///
/// All methods take `&self`: state lives in per-spec nodes of the
/// [`DependencyGraph`], each behind its own lock, so one scheduler is shared
/// by every driver task. Every state change bumps a generation counter that
/// [`Scheduler::subscribe`] exposes to whoever waits for the run to settle.
#[derive(Debug)]
pub struct Scheduler {
    graph: DependencyGraph,
    tracer: Tracer,
    changes: watch::Sender<u64>,
    shutdown: AtomicBool,
}

impl Scheduler {
    pub fn new(tracer: Tracer) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            graph: DependencyGraph::new(),
            tracer,
            changes,
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    fn state_manager(&self) -> StateManager<'_> {
        StateManager::new(&self.graph, &self.tracer)
    }

    pub(crate) fn node(&self, identity: &str) -> Result<Arc<SpecNode>> {
        self.graph
            .get(identity)
            .ok_or_else(|| EnvyError::SpecNotFound(identity.to_string()))
    }

    fn bump(&self) {
        self.changes.send_modify(|generation| *generation += 1);
    }

    /// Receiver that observes a new value after every state change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    /// Insert `decl` and its declared dependency edges.
    ///
    /// Idempotent: registering the same identity again is a no-op returning
    /// `Ok(false)`. Dependencies not yet registered get placeholder nodes.
    /// Never blocks on other specs.
    pub fn register(&self, decl: &SpecDecl) -> Result<bool> {
        let identity = decl.identity.as_str();
        let node = self.graph.get_or_insert(identity);
        {
            let mut state = node.lock();
            if state.declared {
                debug!(spec = %identity, "spec already registered");
                return Ok(false);
            }
            state.declared = true;
            self.tracer.emit(TraceEventKind::SpecRegistered {
                spec: identity.to_string(),
            });
        }

        for dep in &decl.dependencies {
            self.add_dependency(identity, &dep.spec, dep.needed_by)?;
        }

        debug!(spec = %identity, deps = decl.dependencies.len(), "spec registered");
        node.wake();
        self.bump();
        Ok(true)
    }

    /// Insert one `parent -> dependency` edge, resolving the late-edge race.
    ///
    /// If the dependency already passed `needed_by` the edge is satisfied on
    /// the spot; if it already failed the parent fails now. Either way the
    /// parent's driver is woken to re-evaluate, so no progress notification
    /// is needed from the dependency.
    pub fn add_dependency(&self, parent: &str, dependency: &str, needed_by: Phase) -> Result<()> {
        let status = self.graph.add_edge(parent, dependency, needed_by, |edge| {
            self.tracer.emit(TraceEventKind::DependencyAdded {
                spec: parent.to_string(),
                dependency: edge.dependency.clone(),
                needed_by: edge.needed_by,
                needed_by_num: edge.needed_by.num(),
            });
        })?;

        let node = self.node(parent)?;
        if status.dependency_failed && !status.satisfied {
            let mgr = self.state_manager();
            if mgr.fail_for_dependency(&node, dependency) {
                mgr.mark_dependents_failed(parent);
            }
        } else if status.satisfied {
            debug!(spec = %parent, dependency = %dependency, "edge satisfied at registration");
        }

        node.wake();
        self.bump();
        Ok(())
    }

    /// Try to admit the spec's cursor phase.
    ///
    /// The phase is runnable when every edge with `needed_by <= cursor`
    /// points at a dependency that completed at least `needed_by`. When an
    /// edge blocks, the dependency's target is raised to `needed_by` so a
    /// lazily-requested dependency starts moving.
    pub fn advance(&self, identity: &str) -> Result<Admission> {
        let node = self.node(identity)?;
        let mgr = self.state_manager();

        loop {
            let (cursor, edges, version) = {
                let mut state = node.lock();
                match state.run {
                    RunState::Failed => return Ok(Admission::Failed),
                    RunState::Done => return Ok(Admission::Done),
                    RunState::Running => return Ok(Admission::Busy),
                    RunState::Pending | RunState::Blocked => {}
                }
                if state.target_reached() {
                    state.run = RunState::Pending;
                    state.blocked_on = None;
                    return Ok(Admission::Idle);
                }
                let cursor = state.cursor;
                let edges: Vec<DependencyEdge> = state
                    .deps
                    .iter()
                    .filter(|e| e.needed_by <= cursor)
                    .cloned()
                    .collect();
                (cursor, edges, state.deps_version)
            };

            let Some(blocker) = mgr.first_unsatisfied(&edges) else {
                let mut state = node.lock();
                if state.deps_version != version || state.cursor != cursor {
                    // An edge landed while dependencies were being checked.
                    continue;
                }
                match state.run {
                    RunState::Failed => return Ok(Admission::Failed),
                    RunState::Done => return Ok(Admission::Done),
                    RunState::Running => return Ok(Admission::Busy),
                    RunState::Pending | RunState::Blocked => {}
                }
                if let Some(dependency) = state.blocked_on.take() {
                    self.tracer.emit(TraceEventKind::Unblocked {
                        spec: identity.to_string(),
                        phase_num: cursor.num(),
                        dependency,
                    });
                }
                state.run = RunState::Running;
                self.tracer.emit(TraceEventKind::phase_start(identity, cursor));
                drop(state);

                debug!(spec = %identity, phase = %cursor, "phase admitted");
                self.bump();
                return Ok(Admission::Run(cursor));
            };

            if blocker.failed {
                if mgr.fail_for_dependency(&node, &blocker.dependency) {
                    mgr.mark_dependents_failed(identity);
                    self.bump();
                }
                return Ok(Admission::Failed);
            }

            self.raise_target(&blocker.dependency, blocker.needed_by)?;

            let mut state = node.lock();
            match state.run {
                RunState::Failed => return Ok(Admission::Failed),
                RunState::Done => return Ok(Admission::Done),
                RunState::Running => return Ok(Admission::Busy),
                RunState::Pending | RunState::Blocked => {}
            }
            let already_blocked = state.run == RunState::Blocked
                && state.blocked_on.as_deref() == Some(blocker.dependency.as_str());
            state.run = RunState::Blocked;
            state.blocked_on = Some(blocker.dependency.clone());
            if !already_blocked {
                self.tracer.emit(TraceEventKind::Blocked {
                    spec: identity.to_string(),
                    phase_num: cursor.num(),
                    dependency: blocker.dependency.clone(),
                    needed_by_num: blocker.needed_by.num(),
                });
            }
            drop(state);

            if !already_blocked {
                debug!(
                    spec = %identity,
                    phase = %cursor,
                    dependency = %blocker.dependency,
                    needed_by = %blocker.needed_by,
                    "blocked on dependency"
                );
                self.bump();
            }
            return Ok(Admission::Blocked {
                dependency: blocker.dependency,
                needed_by: blocker.needed_by,
            });
        }
    }

    /// Record that the running `phase` of `identity` finished successfully,
    /// move the cursor forward and notify dependents.
    ///
    /// Completions for a spec that is no longer running that phase (for
    /// example because a dependency failure overtook it) are ignored.
    pub fn complete_phase(&self, identity: &str, phase: Phase, elapsed: Duration) -> Result<()> {
        let node = self.node(identity)?;
        {
            let mut state = node.lock();
            if state.run != RunState::Running || state.cursor != phase {
                debug!(
                    spec = %identity,
                    phase = %phase,
                    state = ?state.run,
                    "ignoring completion for a phase that is not running"
                );
                return Ok(());
            }
            state.completed = Some(phase);
            self.tracer.emit(TraceEventKind::phase_complete(
                identity,
                phase,
                elapsed.as_millis() as u64,
            ));
            match phase.next() {
                Some(next) => {
                    state.cursor = next;
                    state.run = RunState::Pending;
                }
                None => state.run = RunState::Done,
            }
        }

        if phase.is_terminal() {
            info!(spec = %identity, "spec complete");
        }
        self.bump();
        self.on_dependency_progress(identity, phase);
        Ok(())
    }

    /// Re-evaluate every parent of `dependency` after it completed `phase`.
    ///
    /// Parents blocked on it whose edge is now satisfied go back to pending.
    /// Every parent is woken regardless, which also covers a parent that is
    /// between checking its edges and recording itself as blocked.
    pub fn on_dependency_progress(&self, dependency: &str, phase: Phase) {
        for parent in self.graph.dependents_of(dependency) {
            let Some(node) = self.graph.get(&parent) else {
                continue;
            };
            {
                let mut state = node.lock();
                let was_blocked_here = state.run == RunState::Blocked
                    && state.blocked_on.as_deref() == Some(dependency);
                let satisfied = state
                    .edge_to(dependency)
                    .is_some_and(|e| e.needed_by <= phase);
                if was_blocked_here && satisfied {
                    state.run = RunState::Pending;
                    state.blocked_on = None;
                    self.tracer.emit(TraceEventKind::Unblocked {
                        spec: parent.clone(),
                        phase_num: state.cursor.num(),
                        dependency: dependency.to_string(),
                    });
                }
            }
            node.wake();
        }
    }

    /// Fail `identity` at `phase`.
    ///
    /// First failure wins: returns `Ok(false)` and changes nothing if the spec
    /// is already failed or done. Otherwise every dependent that still needed
    /// this spec fails as well, transitively.
    pub fn fail(&self, identity: &str, phase: Phase, error: &EnvyError) -> Result<bool> {
        let node = self.node(identity)?;
        {
            let mut state = node.lock();
            if state.is_terminal() {
                debug!(spec = %identity, error = %error, "suppressed duplicate failure");
                return Ok(false);
            }
            state.run = RunState::Failed;
            state.blocked_on = None;
            state.failure = Some(error.to_string());
            self.tracer.emit(TraceEventKind::PhaseFailed {
                spec: identity.to_string(),
                phase,
                phase_num: phase.num(),
                error: error.to_string(),
            });
        }
        warn!(spec = %identity, phase = %phase, "{error}");

        let dependents = self.state_manager().mark_dependents_failed(identity);
        if !dependents.is_empty() {
            warn!(spec = %identity, ?dependents, "failing dependents that still needed this spec");
        }
        node.wake();
        self.bump();
        Ok(true)
    }

    /// Raise the target watermark of `identity` to `phase`.
    ///
    /// Never lowers it. Returns whether the watermark changed.
    pub fn raise_target(&self, identity: &str, phase: Phase) -> Result<bool> {
        let node = self.node(identity)?;
        {
            let mut state = node.lock();
            if state.target.is_some_and(|t| t >= phase) {
                return Ok(false);
            }
            let previous = state.target.replace(phase);
            self.tracer.emit(TraceEventKind::TargetExtended {
                spec: identity.to_string(),
                previous_target_num: previous.map(Phase::num),
                new_target_num: phase.num(),
            });
        }
        debug!(spec = %identity, target = %phase, "target raised");
        node.wake();
        self.bump();
        Ok(true)
    }

    /// Ask every driver to stop at its next wakeup.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        for node in self.graph.nodes() {
            node.wake();
        }
        self.bump();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Wait until something may have changed for `identity`.
    pub async fn wait_for_wakeup(&self, identity: &str) -> Result<()> {
        let node = self.node(identity)?;
        node.notified().await;
        Ok(())
    }

    pub fn status(&self, identity: &str) -> Option<SpecStatus> {
        self.graph.get(identity).map(|n| n.status())
    }

    /// Status of every known spec, sorted by identity.
    pub fn statuses(&self) -> Vec<(Identity, SpecStatus)> {
        self.graph
            .nodes()
            .iter()
            .map(|n| (n.identity().to_string(), n.status()))
            .collect()
    }

    /// Whether no spec is running or still has work towards its target.
    pub fn all_settled(&self) -> bool {
        self.graph.nodes().iter().all(|n| n.status().is_settled())
    }

    /// Failed specs with their first recorded error.
    pub fn failures(&self) -> Vec<(Identity, String)> {
        self.statuses()
            .into_iter()
            .filter_map(|(id, status)| status.failure.map(|f| (id, f)))
            .collect()
    }
}
