//! Dependency DAG
//!
//! Stores the subscriber/publisher edges between state cells, computed
//! nodes, widget bindings and structural constructs, and answers the two
//! questions the flush needs: which nodes are downstream of a set of
//! changed cells, and in what order they must be processed.
//!
//! # Algorithm
//!
//! 1. When a cell changes, its direct dependents become `Dirty` and
//!    everything further downstream becomes `MaybeDirty`.
//! 2. At flush time the downstream set of all changed cells is collected.
//! 3. The set is sorted topologically (dependencies before dependents) with
//!    Kahn's algorithm, so a node reachable along two paths is visited
//!    once, after both paths have settled.
//!
//! Edges are only ever added after a reachability check, which keeps the
//! graph acyclic.

use std::collections::{HashMap, HashSet, VecDeque};

use thiserror::Error;

use super::node::{DirtyState, Node, NodeId, NodeKind};

/// Graph integrity errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// Adding the edge would make the graph cyclic.
    #[error("edge {dependency} -> {dependent} would create a cycle")]
    Cycle {
        /// The node being read.
        dependency: NodeId,
        /// The node doing the reading.
        dependent: NodeId,
    },

    /// The node is not in the graph.
    #[error("unknown graph node {0}")]
    UnknownNode(NodeId),
}

/// The dependency graph of one session.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    nodes: HashMap<NodeId, Node>,
}

impl DependencyGraph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node of the given kind and return its ID.
    pub fn add_node(&mut self, kind: NodeKind) -> NodeId {
        let node = Node::new(kind);
        let id = node.id();
        self.nodes.insert(id, node);
        id
    }

    /// Remove a node from the graph, along with every edge touching it.
    pub fn remove_node(&mut self, node_id: NodeId) {
        if let Some(node) = self.nodes.remove(&node_id) {
            for dep_id in node.dependencies() {
                if let Some(dep) = self.nodes.get_mut(dep_id) {
                    dep.remove_dependent(node_id);
                }
            }
            for dependent_id in node.dependents() {
                if let Some(dependent) = self.nodes.get_mut(dependent_id) {
                    dependent.remove_dependency(node_id);
                }
            }
        }
    }

    /// Whether the node exists.
    pub fn contains(&self, node_id: NodeId) -> bool {
        self.nodes.contains_key(&node_id)
    }

    /// Get a reference to a node.
    pub fn get_node(&self, node_id: NodeId) -> Option<&Node> {
        self.nodes.get(&node_id)
    }

    /// The kind of a node, if it exists.
    pub fn kind(&self, node_id: NodeId) -> Option<NodeKind> {
        self.nodes.get(&node_id).map(Node::kind)
    }

    /// The dirty state of a node, if it exists.
    pub fn dirty_state(&self, node_id: NodeId) -> Option<DirtyState> {
        self.nodes.get(&node_id).map(Node::dirty_state)
    }

    /// Add a dependency edge: `dependent` reads `dependency`.
    pub fn add_edge(&mut self, dependency: NodeId, dependent: NodeId) -> Result<(), GraphError> {
        self.check_edge(dependency, dependent)?;
        self.link(dependency, dependent);
        Ok(())
    }

    /// Remove a dependency edge.
    pub fn remove_edge(&mut self, dependency: NodeId, dependent: NodeId) {
        if let Some(dep_node) = self.nodes.get_mut(&dependency) {
            dep_node.remove_dependent(dependent);
        }
        if let Some(dependent_node) = self.nodes.get_mut(&dependent) {
            dependent_node.remove_dependency(dependency);
        }
    }

    /// Replace the dependency set of `node_id`.
    ///
    /// Dependencies are re-derived on every recomputation, so edges that
    /// are no longer read are dropped here. All new edges are validated
    /// before any change is applied; on error the old set is kept.
    pub fn set_dependencies(&mut self, node_id: NodeId, deps: &[NodeId]) -> Result<(), GraphError> {
        let current: Vec<NodeId> = self
            .nodes
            .get(&node_id)
            .ok_or(GraphError::UnknownNode(node_id))?
            .dependencies()
            .iter()
            .copied()
            .collect();

        for &dep in deps {
            if !current.contains(&dep) {
                self.check_edge(dep, node_id)?;
            }
        }

        for dep in current.iter().filter(|d| !deps.contains(d)) {
            self.remove_edge(*dep, node_id);
        }
        for &dep in deps {
            self.link(dep, node_id);
        }
        Ok(())
    }

    /// Whether `to` is reachable from `from` by following dependent edges.
    pub fn reaches(&self, from: NodeId, to: NodeId) -> bool {
        let mut visited = HashSet::new();
        let mut stack = vec![from];

        while let Some(node_id) = stack.pop() {
            if node_id == to {
                return true;
            }
            if !visited.insert(node_id) {
                continue;
            }
            if let Some(node) = self.nodes.get(&node_id) {
                stack.extend(node.dependents().iter().copied());
            }
        }
        false
    }

    /// Mark a source node as changed and propagate dirty flags.
    ///
    /// Direct dependents become `Dirty`, everything further downstream
    /// `MaybeDirty`.
    pub fn mark_changed(&mut self, source_id: NodeId) {
        let direct: Vec<NodeId> = match self.nodes.get(&source_id) {
            Some(source) => source.dependents().iter().copied().collect(),
            None => return,
        };

        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();

        for node_id in direct {
            if let Some(node) = self.nodes.get_mut(&node_id) {
                node.mark_dirty();
            }
            queue.push_back(node_id);
        }

        while let Some(node_id) = queue.pop_front() {
            if !visited.insert(node_id) {
                continue;
            }
            if let Some(node) = self.nodes.get_mut(&node_id) {
                node.mark_maybe_dirty();
                queue.extend(node.dependents().iter().copied());
            }
        }
    }

    /// Collect everything downstream of `sources`, topologically sorted.
    ///
    /// The sources themselves are not part of the result.
    pub fn collect_affected<I>(&self, sources: I) -> Vec<NodeId>
    where
        I: IntoIterator<Item = NodeId>,
    {
        let mut to_process = Vec::new();
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();

        for source_id in sources {
            if let Some(source) = self.nodes.get(&source_id) {
                queue.extend(source.dependents().iter().copied());
            }
        }

        while let Some(node_id) = queue.pop_front() {
            if !visited.insert(node_id) {
                continue;
            }
            if let Some(node) = self.nodes.get(&node_id) {
                to_process.push(node_id);
                queue.extend(node.dependents().iter().copied());
            }
        }

        self.topological_sort(to_process)
    }

    /// Mark the given nodes clean.
    pub fn mark_clean<I>(&mut self, ids: I)
    where
        I: IntoIterator<Item = NodeId>,
    {
        for id in ids {
            if let Some(node) = self.nodes.get_mut(&id) {
                node.mark_clean();
            }
        }
    }

    /// Get the total number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Drop every node.
    pub fn clear(&mut self) {
        self.nodes.clear();
    }

    fn check_edge(&self, dependency: NodeId, dependent: NodeId) -> Result<(), GraphError> {
        if !self.nodes.contains_key(&dependency) {
            return Err(GraphError::UnknownNode(dependency));
        }
        if !self.nodes.contains_key(&dependent) {
            return Err(GraphError::UnknownNode(dependent));
        }
        if dependency == dependent || self.reaches(dependent, dependency) {
            return Err(GraphError::Cycle {
                dependency,
                dependent,
            });
        }
        Ok(())
    }

    fn link(&mut self, dependency: NodeId, dependent: NodeId) {
        if let Some(dep_node) = self.nodes.get_mut(&dependency) {
            dep_node.add_dependent(dependent);
        }
        if let Some(dependent_node) = self.nodes.get_mut(&dependent) {
            dependent_node.add_dependency(dependency);
        }
    }

    /// Kahn's algorithm restricted to `nodes`. Ties keep discovery order.
    fn topological_sort(&self, nodes: Vec<NodeId>) -> Vec<NodeId> {
        let node_set: HashSet<_> = nodes.iter().copied().collect();
        let mut in_degree: HashMap<NodeId, usize> = HashMap::new();
        let mut result = Vec::with_capacity(nodes.len());
        let mut queue = VecDeque::new();

        for &node_id in &nodes {
            if let Some(node) = self.nodes.get(&node_id) {
                let degree = node
                    .dependencies()
                    .iter()
                    .filter(|d| node_set.contains(d))
                    .count();
                in_degree.insert(node_id, degree);
                if degree == 0 {
                    queue.push_back(node_id);
                }
            }
        }

        while let Some(node_id) = queue.pop_front() {
            result.push(node_id);

            if let Some(node) = self.nodes.get(&node_id) {
                for &dependent_id in node.dependents() {
                    if let Some(degree) = in_degree.get_mut(&dependent_id) {
                        *degree = degree.saturating_sub(1);
                        if *degree == 0 {
                            queue.push_back(dependent_id);
                        }
                    }
                }
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(order: &[NodeId], id: NodeId) -> usize {
        order.iter().position(|&n| n == id).unwrap()
    }

    #[test]
    fn add_and_remove_nodes() {
        let mut graph = DependencyGraph::new();
        let source = graph.add_node(NodeKind::Source);
        let derived = graph.add_node(NodeKind::Derived);
        graph.add_edge(source, derived).unwrap();

        assert_eq!(graph.node_count(), 2);

        graph.remove_node(source);
        assert_eq!(graph.node_count(), 1);
        assert!(graph.get_node(derived).unwrap().dependencies().is_empty());
    }

    #[test]
    fn self_edge_is_a_cycle() {
        let mut graph = DependencyGraph::new();
        let a = graph.add_node(NodeKind::Derived);
        assert_eq!(
            graph.add_edge(a, a),
            Err(GraphError::Cycle {
                dependency: a,
                dependent: a
            })
        );
    }

    #[test]
    fn closing_edge_is_rejected() {
        let mut graph = DependencyGraph::new();
        let a = graph.add_node(NodeKind::Derived);
        let b = graph.add_node(NodeKind::Derived);
        let c = graph.add_node(NodeKind::Derived);
        graph.add_edge(a, b).unwrap();
        graph.add_edge(b, c).unwrap();

        assert!(matches!(graph.add_edge(c, a), Err(GraphError::Cycle { .. })));
        assert!(graph.get_node(a).unwrap().dependencies().is_empty());
    }

    #[test]
    fn set_dependencies_replaces_edges() {
        let mut graph = DependencyGraph::new();
        let a = graph.add_node(NodeKind::Source);
        let b = graph.add_node(NodeKind::Source);
        let derived = graph.add_node(NodeKind::Derived);

        graph.set_dependencies(derived, &[a, b]).unwrap();
        graph.set_dependencies(derived, &[a]).unwrap();

        assert!(graph.get_node(a).unwrap().dependents().contains(&derived));
        assert!(!graph.get_node(b).unwrap().dependents().contains(&derived));
    }

    #[test]
    fn set_dependencies_keeps_old_set_on_cycle() {
        let mut graph = DependencyGraph::new();
        let s = graph.add_node(NodeKind::Source);
        let x = graph.add_node(NodeKind::Derived);
        let y = graph.add_node(NodeKind::Derived);
        graph.set_dependencies(x, &[s]).unwrap();
        graph.set_dependencies(y, &[x]).unwrap();

        let err = graph.set_dependencies(x, &[s, y]).unwrap_err();
        assert!(matches!(err, GraphError::Cycle { .. }));
        let deps: Vec<_> = graph.get_node(x).unwrap().dependencies().iter().copied().collect();
        assert_eq!(deps, vec![s]);
    }

    #[test]
    fn mark_changed_distinguishes_direct_and_transitive() {
        let mut graph = DependencyGraph::new();
        let source = graph.add_node(NodeKind::Source);
        let d1 = graph.add_node(NodeKind::Derived);
        let d2 = graph.add_node(NodeKind::Derived);
        graph.add_edge(source, d1).unwrap();
        graph.add_edge(d1, d2).unwrap();
        graph.mark_clean([d1, d2]);

        graph.mark_changed(source);

        assert_eq!(graph.dirty_state(d1), Some(DirtyState::Dirty));
        assert_eq!(graph.dirty_state(d2), Some(DirtyState::MaybeDirty));
    }

    #[test]
    fn diamond_is_sorted_once_in_dependency_order() {
        let mut graph = DependencyGraph::new();
        let s = graph.add_node(NodeKind::Source);
        let x = graph.add_node(NodeKind::Derived);
        let y = graph.add_node(NodeKind::Derived);
        let h = graph.add_node(NodeKind::Derived);
        let binding = graph.add_node(NodeKind::Binding);
        graph.add_edge(s, x).unwrap();
        graph.add_edge(s, y).unwrap();
        graph.add_edge(x, h).unwrap();
        graph.add_edge(y, h).unwrap();
        graph.add_edge(h, binding).unwrap();

        let order = graph.collect_affected([s]);

        assert_eq!(order.len(), 4);
        assert!(position(&order, x) < position(&order, h));
        assert!(position(&order, y) < position(&order, h));
        assert!(position(&order, h) < position(&order, binding));
    }

    #[test]
    fn affected_merges_multiple_sources() {
        let mut graph = DependencyGraph::new();
        let a = graph.add_node(NodeKind::Source);
        let b = graph.add_node(NodeKind::Source);
        let sum = graph.add_node(NodeKind::Derived);
        graph.add_edge(a, sum).unwrap();
        graph.add_edge(b, sum).unwrap();

        assert_eq!(graph.collect_affected([a, b]), vec![sum]);
    }
}
