//! Server-held widget tree.
//!
//! Ownership flows parent to child: a node lists its children by id and
//! keeps only the id of its parent. Removing a node removes its whole
//! subtree.

use std::collections::HashMap;
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::patch::SnapshotNode;
use crate::graph::NodeId;

/// Identity of a widget, unique within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WidgetId(u64);

impl WidgetId {
    /// The implicit root every session tree starts with.
    pub const ROOT: WidgetId = WidgetId(0);

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl From<u64> for WidgetId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for WidgetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "w{}", self.0)
    }
}

/// One property: the last value shipped to the client, and the binding
/// node driving it, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct PropSlot {
    pub value: Value,
    pub binding: Option<NodeId>,
}

impl PropSlot {
    pub fn literal(value: Value) -> Self {
        Self {
            value,
            binding: None,
        }
    }
}

/// A node in the widget tree.
#[derive(Debug, Clone)]
pub struct WidgetNode {
    id: WidgetId,
    kind: String,
    pub(crate) props: IndexMap<String, PropSlot>,
    children: Vec<WidgetId>,
    parent: Option<WidgetId>,
    mounted: bool,
}

impl WidgetNode {
    pub fn id(&self) -> WidgetId {
        self.id
    }

    /// The type tag shipped to the renderer.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn props(&self) -> &IndexMap<String, PropSlot> {
        &self.props
    }

    pub fn children(&self) -> &[WidgetId] {
        &self.children
    }

    pub fn parent(&self) -> Option<WidgetId> {
        self.parent
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    /// Current rendered property values.
    pub fn rendered_props(&self) -> IndexMap<String, Value> {
        self.props
            .iter()
            .map(|(name, slot)| (name.clone(), slot.value.clone()))
            .collect()
    }
}

/// The widget tree of one session.
#[derive(Debug)]
pub struct WidgetTree {
    nodes: HashMap<WidgetId, WidgetNode>,
    next_id: u64,
}

impl Default for WidgetTree {
    fn default() -> Self {
        Self::new()
    }
}

impl WidgetTree {
    /// A tree holding only the root.
    pub fn new() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            WidgetId::ROOT,
            WidgetNode {
                id: WidgetId::ROOT,
                kind: "root".to_owned(),
                props: IndexMap::new(),
                children: Vec::new(),
                parent: None,
                mounted: true,
            },
        );
        Self { nodes, next_id: 1 }
    }

    /// Create a node under `parent` at `index` (clamped to the child count).
    ///
    /// Returns `None` if the parent does not exist.
    pub fn insert(
        &mut self,
        parent: WidgetId,
        index: usize,
        kind: impl Into<String>,
        props: IndexMap<String, PropSlot>,
    ) -> Option<WidgetId> {
        let id = WidgetId(self.next_id);
        let siblings = &mut self.nodes.get_mut(&parent)?.children;
        siblings.insert(index.min(siblings.len()), id);
        self.next_id += 1;

        self.nodes.insert(
            id,
            WidgetNode {
                id,
                kind: kind.into(),
                props,
                children: Vec::new(),
                parent: Some(parent),
                mounted: true,
            },
        );
        Some(id)
    }

    /// Detach `id` from its parent and drop its subtree.
    ///
    /// Returns the removed nodes, subtree root first.
    pub fn remove_subtree(&mut self, id: WidgetId) -> Vec<WidgetNode> {
        if id == WidgetId::ROOT {
            return Vec::new();
        }
        let Some(parent) = self.nodes.get(&id).and_then(WidgetNode::parent) else {
            return Vec::new();
        };
        if let Some(parent) = self.nodes.get_mut(&parent) {
            parent.children.retain(|child| *child != id);
        }

        let mut removed = Vec::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if let Some(mut node) = self.nodes.remove(&next) {
                node.mounted = false;
                stack.extend(node.children.iter().rev().copied());
                removed.push(node);
            }
        }
        removed
    }

    /// Detach `id` and re-insert it at `new_index` among its parent's
    /// remaining children.
    pub fn move_child(&mut self, id: WidgetId, new_index: usize) -> bool {
        let Some(parent) = self.nodes.get(&id).and_then(WidgetNode::parent) else {
            return false;
        };
        let Some(parent) = self.nodes.get_mut(&parent) else {
            return false;
        };
        parent.children.retain(|child| *child != id);
        let index = new_index.min(parent.children.len());
        parent.children.insert(index, id);
        true
    }

    /// Position of `id` among its parent's children.
    pub fn index_of(&self, id: WidgetId) -> Option<usize> {
        let parent = self.nodes.get(&id)?.parent?;
        self.nodes
            .get(&parent)?
            .children
            .iter()
            .position(|child| *child == id)
    }

    /// Distance from the root; the root has depth 0.
    pub fn depth(&self, id: WidgetId) -> usize {
        let mut depth = 0;
        let mut current = self.nodes.get(&id).and_then(WidgetNode::parent);
        while let Some(parent) = current {
            depth += 1;
            current = self.nodes.get(&parent).and_then(WidgetNode::parent);
        }
        depth
    }

    /// Overwrite the rendered value of a property.
    pub fn set_prop(&mut self, id: WidgetId, field: &str, value: Value) -> bool {
        match self.nodes.get_mut(&id).and_then(|n| n.props.get_mut(field)) {
            Some(slot) => {
                slot.value = value;
                true
            }
            None => false,
        }
    }

    /// Attach a binding node to an existing property.
    pub fn bind_prop(&mut self, id: WidgetId, field: &str, binding: NodeId) -> bool {
        match self.nodes.get_mut(&id).and_then(|n| n.props.get_mut(field)) {
            Some(slot) => {
                slot.binding = Some(binding);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: WidgetId) -> Option<&WidgetNode> {
        self.nodes.get(&id)
    }

    pub fn contains(&self, id: WidgetId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Number of nodes, including the root.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    /// Serialize the subtree rooted at `id`.
    pub fn snapshot_from(&self, id: WidgetId) -> Option<SnapshotNode> {
        let node = self.nodes.get(&id)?;
        Some(SnapshotNode {
            id,
            kind: node.kind.clone(),
            props: node.rendered_props(),
            children: node
                .children
                .iter()
                .filter_map(|child| self.snapshot_from(*child))
                .collect(),
        })
    }

    /// Drop everything but an empty root.
    pub fn clear(&mut self) {
        *self = Self::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props(pairs: &[(&str, Value)]) -> IndexMap<String, PropSlot> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), PropSlot::literal(v.clone())))
            .collect()
    }

    #[test]
    fn insert_clamps_index() {
        let mut tree = WidgetTree::new();
        let a = tree.insert(WidgetId::ROOT, 0, "text", props(&[])).unwrap();
        let b = tree.insert(WidgetId::ROOT, 99, "text", props(&[])).unwrap();
        let c = tree.insert(WidgetId::ROOT, 0, "text", props(&[])).unwrap();

        let root = tree.get(WidgetId::ROOT).unwrap();
        assert_eq!(root.children(), &[c, a, b]);
        assert_eq!(tree.index_of(b), Some(2));
        assert!(tree.insert(WidgetId::from(1234), 0, "text", props(&[])).is_none());
    }

    #[test]
    fn remove_subtree_drops_descendants() {
        let mut tree = WidgetTree::new();
        let column = tree.insert(WidgetId::ROOT, 0, "column", props(&[])).unwrap();
        let label = tree.insert(column, 0, "text", props(&[])).unwrap();
        let other = tree.insert(WidgetId::ROOT, 1, "text", props(&[])).unwrap();

        let removed = tree.remove_subtree(column);
        assert_eq!(removed.len(), 2);
        assert_eq!(removed[0].id(), column);
        assert!(removed.iter().all(|n| !n.is_mounted()));
        assert!(!tree.contains(label));
        assert_eq!(tree.get(WidgetId::ROOT).unwrap().children(), &[other]);
    }

    #[test]
    fn move_detaches_then_inserts() {
        let mut tree = WidgetTree::new();
        let ids: Vec<_> = (0..3)
            .map(|i| tree.insert(WidgetId::ROOT, i, "text", props(&[])).unwrap())
            .collect();

        assert!(tree.move_child(ids[0], 2));
        assert_eq!(tree.get(WidgetId::ROOT).unwrap().children(), &[ids[1], ids[2], ids[0]]);
    }

    #[test]
    fn snapshot_carries_rendered_props() {
        let mut tree = WidgetTree::new();
        let column = tree.insert(WidgetId::ROOT, 0, "column", props(&[])).unwrap();
        let text = tree.insert(column, 0, "text", props(&[("value", json!("hi"))])).unwrap();
        tree.set_prop(text, "value", json!("bye"));

        let snap = tree.snapshot_from(WidgetId::ROOT).unwrap();
        assert_eq!(snap.children[0].children[0].props["value"], json!("bye"));
        assert_eq!(tree.depth(text), 2);
    }
}
