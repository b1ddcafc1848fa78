//! Client-side tree mirror.
//!
//! Applies patch batches the way a renderer would. An operation that names
//! a node the mirror does not have is dropped and the rest of the batch
//! still applies; any drop means the client and server are out of sync.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde_json::Value;
use tracing::warn;

use super::patch::{Patch, PatchBatch, Snapshot, SnapshotNode};
use super::tree::WidgetId;

/// Outcome of applying one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub applied: usize,
    pub dropped: usize,
}

#[derive(Debug, Clone)]
struct MirrorNode {
    kind: String,
    props: IndexMap<String, Value>,
    children: Vec<WidgetId>,
    parent: Option<WidgetId>,
}

/// A renderer's view of one session's tree.
#[derive(Debug, Clone)]
pub struct ClientTree {
    root: WidgetId,
    nodes: HashMap<WidgetId, MirrorNode>,
    last_seq: Option<u64>,
}

impl ClientTree {
    /// Hydrate from a snapshot.
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        let mut tree = Self {
            root: snapshot.root.id,
            nodes: HashMap::new(),
            last_seq: None,
        };
        tree.load(&snapshot.root, None);
        tree
    }

    fn load(&mut self, node: &SnapshotNode, parent: Option<WidgetId>) {
        self.nodes.insert(
            node.id,
            MirrorNode {
                kind: node.kind.clone(),
                props: node.props.clone(),
                children: node.children.iter().map(|c| c.id).collect(),
                parent,
            },
        );
        for child in &node.children {
            self.load(child, Some(node.id));
        }
    }

    /// Apply every operation of `batch` in order.
    pub fn apply(&mut self, batch: &PatchBatch) -> ApplyReport {
        if let Some(last) = self.last_seq {
            if batch.seq <= last {
                warn!(seq = batch.seq, last, "batch out of order");
            }
        }
        self.last_seq = Some(batch.seq);

        let mut report = ApplyReport::default();
        for op in &batch.ops {
            if self.apply_op(op) {
                report.applied += 1;
            } else {
                warn!(session = %batch.session, node = %op.node_id(), ?op, "protocol desync: dropping operation");
                report.dropped += 1;
            }
        }
        report
    }

    fn apply_op(&mut self, op: &Patch) -> bool {
        match op {
            Patch::Mount {
                parent_id,
                index,
                node_id,
                kind,
                props,
            } => {
                if self.nodes.contains_key(node_id) {
                    return false;
                }
                let Some(parent) = self.nodes.get_mut(parent_id) else {
                    return false;
                };
                let at = (*index).min(parent.children.len());
                parent.children.insert(at, *node_id);
                self.nodes.insert(
                    *node_id,
                    MirrorNode {
                        kind: kind.clone(),
                        props: props.clone(),
                        children: Vec::new(),
                        parent: Some(*parent_id),
                    },
                );
                true
            }
            Patch::Unmount { node_id } => {
                if *node_id == self.root {
                    return false;
                }
                let Some(node) = self.nodes.get(node_id) else {
                    return false;
                };
                if let Some(parent) = node.parent.and_then(|p| self.nodes.get_mut(&p)) {
                    parent.children.retain(|c| c != node_id);
                }
                let mut stack = vec![*node_id];
                while let Some(next) = stack.pop() {
                    if let Some(removed) = self.nodes.remove(&next) {
                        stack.extend(removed.children);
                    }
                }
                true
            }
            Patch::Move { node_id, new_index } => {
                let Some(parent_id) = self.nodes.get(node_id).and_then(|n| n.parent) else {
                    return false;
                };
                let Some(parent) = self.nodes.get_mut(&parent_id) else {
                    return false;
                };
                parent.children.retain(|c| c != node_id);
                let at = (*new_index).min(parent.children.len());
                parent.children.insert(at, *node_id);
                true
            }
            Patch::Update {
                node_id,
                field,
                value,
            } => match self.nodes.get_mut(node_id) {
                Some(node) => {
                    node.props.insert(field.clone(), value.clone());
                    true
                }
                None => false,
            },
        }
    }

    /// Serialize the mirrored tree in the snapshot format.
    pub fn to_snapshot_node(&self) -> SnapshotNode {
        self.export(self.root).unwrap_or_else(|| SnapshotNode {
            id: self.root,
            kind: "root".to_owned(),
            props: IndexMap::new(),
            children: Vec::new(),
        })
    }

    fn export(&self, id: WidgetId) -> Option<SnapshotNode> {
        let node = self.nodes.get(&id)?;
        Some(SnapshotNode {
            id,
            kind: node.kind.clone(),
            props: node.props.clone(),
            children: node.children.iter().filter_map(|c| self.export(*c)).collect(),
        })
    }

    pub fn contains(&self, id: WidgetId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn prop(&self, id: WidgetId, field: &str) -> Option<&Value> {
        self.nodes.get(&id)?.props.get(field)
    }

    pub fn children(&self, id: WidgetId) -> &[WidgetId] {
        self.nodes.get(&id).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionId;
    use serde_json::json;

    fn empty(session: SessionId) -> ClientTree {
        ClientTree::from_snapshot(&Snapshot {
            session,
            root: SnapshotNode {
                id: WidgetId::ROOT,
                kind: "root".into(),
                props: IndexMap::new(),
                children: Vec::new(),
            },
        })
    }

    #[test]
    fn unknown_nodes_are_dropped_and_the_rest_applies() {
        let session = SessionId::new();
        let mut tree = empty(session);
        let batch = PatchBatch {
            session,
            seq: 1,
            ops: vec![
                Patch::Mount {
                    parent_id: WidgetId::ROOT,
                    index: 0,
                    node_id: WidgetId::from(1),
                    kind: "text".into(),
                    props: [("value".to_owned(), json!("a"))].into_iter().collect(),
                },
                Patch::Update {
                    node_id: WidgetId::from(42),
                    field: "value".into(),
                    value: json!("lost"),
                },
                Patch::Update {
                    node_id: WidgetId::from(1),
                    field: "value".into(),
                    value: json!("b"),
                },
            ],
        };

        let report = tree.apply(&batch);
        assert_eq!(report, ApplyReport { applied: 2, dropped: 1 });
        assert_eq!(tree.prop(WidgetId::from(1), "value"), Some(&json!("b")));
    }

    #[test]
    fn unmount_removes_descendants() {
        let session = SessionId::new();
        let mut tree = empty(session);
        let mount = |parent: u64, id: u64| Patch::Mount {
            parent_id: WidgetId::from(parent),
            index: 0,
            node_id: WidgetId::from(id),
            kind: "column".into(),
            props: IndexMap::new(),
        };
        tree.apply(&PatchBatch {
            session,
            seq: 1,
            ops: vec![mount(0, 1), mount(1, 2), mount(2, 3)],
        });
        assert_eq!(tree.len(), 4);

        tree.apply(&PatchBatch {
            session,
            seq: 2,
            ops: vec![Patch::Unmount {
                node_id: WidgetId::from(1),
            }],
        });
        assert_eq!(tree.len(), 1);
        assert!(tree.children(WidgetId::ROOT).is_empty());
    }
}
