//! Graph Nodes
//!
//! This module defines the node types that live in the dependency graph.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexSet;

/// Unique identifier for a node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<u64> for NodeId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A state cell. Roots of the graph: dependents only.
    Source,

    /// A computed node. Has dependencies and may have dependents.
    Derived,

    /// A widget property bound to a cell or computed node. Always a leaf.
    Binding,

    /// A branch-select or keyed-list construct. Always a leaf.
    Structure,
}

impl NodeKind {
    /// Whether nodes of this kind may be read by other nodes.
    pub fn is_readable(self) -> bool {
        matches!(self, NodeKind::Source | NodeKind::Derived)
    }
}

/// Dirty state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirtyState {
    /// The node is up-to-date.
    Clean,

    /// Something upstream changed; the node must check its inputs.
    MaybeDirty,

    /// A direct dependency changed.
    Dirty,
}

/// A node in the dependency graph.
#[derive(Debug)]
pub struct Node {
    id: NodeId,
    kind: NodeKind,
    dirty: DirtyState,

    /// Nodes this node reads from. Insertion-ordered so traversals are
    /// deterministic.
    dependencies: IndexSet<NodeId>,

    /// Nodes that read from this node.
    dependents: IndexSet<NodeId>,
}

impl Node {
    /// Create a new node with the given kind.
    pub fn new(kind: NodeKind) -> Self {
        Self {
            id: NodeId::new(),
            kind,
            dirty: match kind {
                NodeKind::Source | NodeKind::Binding | NodeKind::Structure => DirtyState::Clean,
                // Start dirty to ensure first computation
                NodeKind::Derived => DirtyState::Dirty,
            },
            dependencies: IndexSet::new(),
            dependents: IndexSet::new(),
        }
    }

    /// Get the node's ID.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Get the node's kind.
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Get the current dirty state.
    pub fn dirty_state(&self) -> DirtyState {
        self.dirty
    }

    /// Check if the node needs any processing.
    pub fn is_clean(&self) -> bool {
        self.dirty == DirtyState::Clean
    }

    /// Mark the node as clean.
    pub fn mark_clean(&mut self) {
        self.dirty = DirtyState::Clean;
    }

    /// Mark the node as maybe dirty.
    pub fn mark_maybe_dirty(&mut self) {
        if self.dirty == DirtyState::Clean {
            self.dirty = DirtyState::MaybeDirty;
        }
    }

    /// Mark the node as definitely dirty.
    pub fn mark_dirty(&mut self) {
        self.dirty = DirtyState::Dirty;
    }

    pub(crate) fn add_dependency(&mut self, node_id: NodeId) {
        self.dependencies.insert(node_id);
    }

    pub(crate) fn remove_dependency(&mut self, node_id: NodeId) {
        self.dependencies.shift_remove(&node_id);
    }

    /// Get all dependencies.
    pub fn dependencies(&self) -> &IndexSet<NodeId> {
        &self.dependencies
    }

    pub(crate) fn add_dependent(&mut self, node_id: NodeId) {
        self.dependents.insert(node_id);
    }

    pub(crate) fn remove_dependent(&mut self, node_id: NodeId) {
        self.dependents.shift_remove(&node_id);
    }

    /// Get all dependents.
    pub fn dependents(&self) -> &IndexSet<NodeId> {
        &self.dependents
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_ids_are_unique() {
        let id1 = NodeId::new();
        let id2 = NodeId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn source_node_starts_clean() {
        let node = Node::new(NodeKind::Source);
        assert_eq!(node.kind(), NodeKind::Source);
        assert!(node.is_clean());
    }

    #[test]
    fn derived_node_starts_dirty() {
        let node = Node::new(NodeKind::Derived);
        assert_eq!(node.dirty_state(), DirtyState::Dirty);
    }

    #[test]
    fn dependency_order_is_preserved() {
        let mut node = Node::new(NodeKind::Binding);
        let a = NodeId::new();
        let b = NodeId::new();
        let c = NodeId::new();

        node.add_dependency(b);
        node.add_dependency(a);
        node.add_dependency(c);
        node.remove_dependency(a);

        let deps: Vec<_> = node.dependencies().iter().copied().collect();
        assert_eq!(deps, vec![b, c]);
    }

    #[test]
    fn maybe_dirty_does_not_downgrade_dirty() {
        let mut node = Node::new(NodeKind::Derived);
        node.mark_maybe_dirty();
        assert_eq!(node.dirty_state(), DirtyState::Dirty);

        node.mark_clean();
        node.mark_maybe_dirty();
        assert_eq!(node.dirty_state(), DirtyState::MaybeDirty);
    }

    #[test]
    fn only_sources_and_derived_are_readable() {
        assert!(NodeKind::Source.is_readable());
        assert!(NodeKind::Derived.is_readable());
        assert!(!NodeKind::Binding.is_readable());
        assert!(!NodeKind::Structure.is_readable());
    }
}
