// src/dag/graph.rs

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::debug;

use crate::dag::node::{DependencyEdge, RunState, SpecNode};
use crate::errors::{EnvyError, Result};
use crate::types::{Identity, Phase};

/// What the dependency looked like right after an edge was inserted.
///
/// This is the post-insertion recheck: the caller must act on it rather than
/// wait for a progress notification that may already have fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeStatus {
    /// The edge was new (as opposed to tightening or repeating an old one).
    pub inserted: bool,
    pub needed_by: Phase,
    /// The dependency already completed `needed_by`.
    pub satisfied: bool,
    /// The dependency already failed.
    pub dependency_failed: bool,
}

/// Arena of spec nodes keyed by identity.
///
/// Each node carries its own lock, so unrelated specs never contend. The map
/// lock is only held to look nodes up or insert them. Edge insertion is
/// serialized separately so cycle detection sees a stable edge set.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    nodes: RwLock<HashMap<Identity, Arc<SpecNode>>>,
    edges: Mutex<()>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, identity: &str) -> Option<Arc<SpecNode>> {
        self.nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identity)
            .cloned()
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.get(identity).is_some()
    }

    /// Look up `identity`, inserting an empty node if absent.
    pub fn get_or_insert(&self, identity: &str) -> Arc<SpecNode> {
        if let Some(node) = self.get(identity) {
            return node;
        }
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            nodes
                .entry(identity.to_string())
                .or_insert_with(|| Arc::new(SpecNode::new(identity.to_string()))),
        )
    }

    /// Snapshot of every node, sorted by identity.
    pub fn nodes(&self) -> Vec<Arc<SpecNode>> {
        let mut nodes: Vec<_> = self
            .nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        nodes.sort_by(|a, b| a.identity().cmp(b.identity()));
        nodes
    }

    pub fn identities(&self) -> Vec<Identity> {
        self.nodes().iter().map(|n| n.identity().to_string()).collect()
    }

    /// Immediate dependencies of a spec.
    pub fn dependencies_of(&self, identity: &str) -> Vec<DependencyEdge> {
        self.get(identity)
            .map(|n| n.lock().deps.clone())
            .unwrap_or_default()
    }

    /// Immediate dependents of a spec.
    pub fn dependents_of(&self, identity: &str) -> Vec<Identity> {
        self.get(identity)
            .map(|n| n.lock().dependents.clone())
            .unwrap_or_default()
    }

    /// Insert `parent -> dependency` with the given needed-by phase.
    ///
    /// Both nodes are created if missing. A repeated edge keeps the earlier
    /// (stricter) needed-by phase. `on_insert` runs under the parent's lock
    /// right after the edge lands, so events it emits are ordered with the
    /// parent's own phase events.
    ///
    /// Returns [`EnvyError::DagCycle`] if the edge would close a cycle; the
    /// graph is left unchanged in that case.
    pub fn add_edge(
        &self,
        parent: &str,
        dependency: &str,
        needed_by: Phase,
        on_insert: impl FnOnce(&DependencyEdge),
    ) -> Result<EdgeStatus> {
        let _edges = self.edges.lock().unwrap_or_else(PoisonError::into_inner);

        if self.reaches(dependency, parent) {
            return Err(EnvyError::DagCycle(format!(
                "adding dependency '{dependency}' to '{parent}' would close a cycle"
            )));
        }

        let parent_node = self.get_or_insert(parent);
        let dep_node = self.get_or_insert(dependency);

        let (inserted, needed_by) = {
            let mut state = parent_node.lock();
            let (inserted, needed_by) = match state
                .deps
                .iter_mut()
                .find(|e| e.dependency == dependency)
            {
                Some(edge) => {
                    edge.needed_by = edge.needed_by.min(needed_by);
                    (false, edge.needed_by)
                }
                None => {
                    let edge = DependencyEdge {
                        dependency: dependency.to_string(),
                        needed_by,
                    };
                    on_insert(&edge);
                    state.deps.push(edge);
                    (true, needed_by)
                }
            };
            state.deps_version += 1;
            (inserted, needed_by)
        };

        // Recheck the dependency only after the edge is visible, so either
        // this read or the dependency's next progress notification sees it.
        let mut dep_state = dep_node.lock();
        if !dep_state.dependents.iter().any(|d| d == parent) {
            dep_state.dependents.push(parent.to_string());
        }
        let status = EdgeStatus {
            inserted,
            needed_by,
            satisfied: dep_state.satisfies(needed_by),
            dependency_failed: dep_state.run == RunState::Failed,
        };
        drop(dep_state);

        debug!(
            parent = %parent,
            dependency = %dependency,
            needed_by = %needed_by,
            satisfied = status.satisfied,
            "dependency edge registered"
        );
        Ok(status)
    }

    /// Whether `to` is reachable from `from` by following dependency edges.
    fn reaches(&self, from: &str, to: &str) -> bool {
        let mut stack = vec![from.to_string()];
        let mut visited: HashSet<Identity> = HashSet::new();

        while let Some(name) = stack.pop() {
            if name == to {
                return true;
            }
            if !visited.insert(name.clone()) {
                continue;
            }
            stack.extend(
                self.dependencies_of(&name)
                    .into_iter()
                    .map(|e| e.dependency),
            );
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edges_are_mirrored_as_dependents() {
        let graph = DependencyGraph::new();
        graph.add_edge("a", "b", Phase::AssetBuild, |_| {}).unwrap();
        graph.add_edge("a", "c", Phase::AssetStage, |_| {}).unwrap();

        assert_eq!(graph.identities(), vec!["a", "b", "c"]);
        assert_eq!(graph.dependents_of("b"), vec!["a"]);
        assert_eq!(
            graph.dependencies_of("a"),
            vec![
                DependencyEdge { dependency: "b".into(), needed_by: Phase::AssetBuild },
                DependencyEdge { dependency: "c".into(), needed_by: Phase::AssetStage },
            ]
        );
    }

    #[test]
    fn repeated_edge_keeps_the_stricter_phase() {
        let graph = DependencyGraph::new();
        let first = graph.add_edge("a", "b", Phase::AssetBuild, |_| {}).unwrap();
        let second = graph.add_edge("a", "b", Phase::AssetFetch, |_| {}).unwrap();
        let third = graph.add_edge("a", "b", Phase::Completion, |_| {}).unwrap();

        assert!(first.inserted);
        assert!(!second.inserted);
        assert_eq!(third.needed_by, Phase::AssetFetch);
        assert_eq!(graph.dependencies_of("a").len(), 1);
        assert_eq!(graph.dependents_of("b"), vec!["a"]);
    }

    #[test]
    fn cycles_are_rejected_without_mutation() {
        let graph = DependencyGraph::new();
        graph.add_edge("a", "b", Phase::AssetBuild, |_| {}).unwrap();
        graph.add_edge("b", "c", Phase::AssetBuild, |_| {}).unwrap();

        let err = graph.add_edge("c", "a", Phase::AssetBuild, |_| {}).unwrap_err();
        assert!(matches!(err, EnvyError::DagCycle(_)));
        assert!(graph.dependencies_of("c").is_empty());

        let err = graph.add_edge("a", "a", Phase::AssetBuild, |_| {}).unwrap_err();
        assert!(err.is_graph_error());
    }

    #[test]
    fn late_edge_sees_already_completed_dependency() {
        let graph = DependencyGraph::new();
        let dep = graph.get_or_insert("d");
        dep.lock().completed = Some(Phase::AssetInstall);

        let status = graph.add_edge("p", "d", Phase::AssetBuild, |_| {}).unwrap();
        assert!(status.satisfied);

        let status = graph.add_edge("q", "d", Phase::Completion, |_| {}).unwrap();
        assert!(!status.satisfied);
    }
}
