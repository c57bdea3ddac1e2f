// src/dag/node.rs

//! Per-spec node state held in the dependency graph arena.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use crate::types::{Identity, Phase};

/// Scheduling state of one spec (internal).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// The cursor phase has not been admitted yet.
    Pending,
    /// The cursor phase is executing on a worker.
    Running,
    /// The cursor phase waits for a dependency edge to be satisfied.
    Blocked,
    /// A phase body or a required dependency failed. Terminal.
    Failed,
    /// COMPLETION has been reached. Terminal.
    Done,
}

/// One outgoing `parent -> dependency` edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyEdge {
    pub dependency: Identity,
    pub needed_by: Phase,
}

/// Mutable state of a spec node. Only ever touched under the node's own lock.
#[derive(Debug)]
pub(crate) struct NodeState {
    /// Whether `register` has seen the spec itself (as opposed to a
    /// placeholder created by a dependent's edge).
    pub declared: bool,
    pub run: RunState,
    /// Next phase to execute. Only moves forward.
    pub cursor: Phase,
    /// Highest phase completed so far.
    pub completed: Option<Phase>,
    /// Furthest phase this invocation needs. Only ever raised.
    pub target: Option<Phase>,
    pub deps: Vec<DependencyEdge>,
    /// Bumped on every edge insertion so readiness checks can detect
    /// edges that arrived while they were looking at dependencies.
    pub deps_version: u64,
    pub dependents: Vec<Identity>,
    pub blocked_on: Option<Identity>,
    pub failure: Option<String>,
}

impl NodeState {
    fn new() -> Self {
        Self {
            declared: false,
            run: RunState::Pending,
            cursor: Phase::RecipeFetch,
            completed: None,
            target: None,
            deps: Vec::new(),
            deps_version: 0,
            dependents: Vec::new(),
            blocked_on: None,
            failure: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.run, RunState::Failed | RunState::Done)
    }

    /// Whether the node has nothing left to do for its current target.
    pub fn target_reached(&self) -> bool {
        match self.target {
            None => true,
            Some(target) => self.completed.is_some_and(|c| c >= target),
        }
    }

    /// Whether a dependency at this state satisfies an edge needing `phase`.
    pub fn satisfies(&self, needed_by: Phase) -> bool {
        self.completed.is_some_and(|c| c >= needed_by)
    }

    pub fn edge_to(&self, dependency: &str) -> Option<&DependencyEdge> {
        self.deps.iter().find(|e| e.dependency == dependency)
    }
}

/// Arena slot for one spec: its state plus a wakeup channel for the
/// driver that advances it.
#[derive(Debug)]
pub struct SpecNode {
    identity: Identity,
    state: Mutex<NodeState>,
    notify: Notify,
}

impl SpecNode {
    pub(crate) fn new(identity: Identity) -> Self {
        Self {
            identity,
            state: Mutex::new(NodeState::new()),
            notify: Notify::new(),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Lock this node's state. Callers never hold two node locks at once.
    pub(crate) fn lock(&self) -> MutexGuard<'_, NodeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wake the node's driver. A wakeup sent while nobody waits is kept
    /// for the next [`SpecNode::notified`] call.
    pub(crate) fn wake(&self) {
        self.notify.notify_one();
    }

    pub(crate) async fn notified(&self) {
        self.notify.notified().await
    }

    pub(crate) fn status(&self) -> SpecStatus {
        let state = self.lock();
        SpecStatus {
            state: match state.run {
                RunState::Pending if state.target_reached() => SpecRunState::Idle,
                RunState::Pending => SpecRunState::Pending(state.cursor),
                RunState::Running => SpecRunState::Running(state.cursor),
                RunState::Blocked => SpecRunState::Blocked {
                    phase: state.cursor,
                    dependency: state.blocked_on.clone().unwrap_or_default(),
                },
                RunState::Failed => SpecRunState::Failed,
                RunState::Done => SpecRunState::Done,
            },
            completed: state.completed,
            target: state.target,
            failure: state.failure.clone(),
        }
    }
}

/// Public, read-only view of a spec's scheduling state.
///
/// Exposed for tests and diagnostics without leaking [`NodeState`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecRunState {
    /// Waiting to run the given phase.
    Pending(Phase),
    Running(Phase),
    Blocked { phase: Phase, dependency: Identity },
    /// Reached its target watermark; parked until the target is raised.
    Idle,
    Failed,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecStatus {
    pub state: SpecRunState,
    pub completed: Option<Phase>,
    pub target: Option<Phase>,
    pub failure: Option<String>,
}

impl SpecStatus {
    /// Failed, done, or parked at its target with nothing running.
    pub fn is_settled(&self) -> bool {
        matches!(
            self.state,
            SpecRunState::Idle | SpecRunState::Failed | SpecRunState::Done
        )
    }
}
