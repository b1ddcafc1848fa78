//! Wire protocol between a session and its remote renderer.
//!
//! A flush produces one [`PatchBatch`]: structural operations first, in the
//! order they were performed, then property updates. A client that applies
//! the operations in order never references a node before it is mounted.
//!
//! ```json
//! {"op":"mount","parentId":3,"index":1,"nodeId":9,"type":"text","props":{"val":"b"}}
//! {"op":"unmount","nodeId":4}
//! {"op":"move","nodeId":7,"newIndex":0}
//! {"op":"update","nodeId":5,"field":"value","value":"hello"}
//! ```

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::tree::WidgetId;
use crate::error::{Error, Result};
use crate::session::SessionId;

/// A single tree mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Patch {
    /// Create `node_id` under `parent_id` at `index`.
    #[serde(rename_all = "camelCase")]
    Mount {
        parent_id: WidgetId,
        index: usize,
        node_id: WidgetId,
        #[serde(rename = "type")]
        kind: String,
        props: IndexMap<String, Value>,
    },

    /// Remove `node_id` and its subtree.
    #[serde(rename_all = "camelCase")]
    Unmount { node_id: WidgetId },

    /// Detach `node_id`, then insert it at `new_index` of its parent's
    /// remaining children.
    #[serde(rename_all = "camelCase")]
    Move { node_id: WidgetId, new_index: usize },

    /// Set one property.
    #[serde(rename_all = "camelCase")]
    Update {
        node_id: WidgetId,
        field: String,
        value: Value,
    },
}

impl Patch {
    /// The node the operation targets.
    pub fn node_id(&self) -> WidgetId {
        match self {
            Patch::Mount { node_id, .. }
            | Patch::Unmount { node_id }
            | Patch::Move { node_id, .. }
            | Patch::Update { node_id, .. } => *node_id,
        }
    }

    /// Whether the operation changes the tree's shape.
    pub fn is_structural(&self) -> bool {
        !matches!(self, Patch::Update { .. })
    }
}

/// The ordered output of one flush.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchBatch {
    pub session: SessionId,
    /// Increases by one per batch emitted by the session.
    pub seq: u64,
    pub ops: Vec<Patch>,
}

impl PatchBatch {
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(Error::Json)
    }

    pub fn from_json(input: &str) -> Result<Self> {
        serde_json::from_str(input).map_err(Error::Json)
    }

    /// MessagePack with named fields, so the payload is self-describing.
    pub fn to_msgpack(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    pub fn from_msgpack(bytes: &[u8]) -> Result<Self> {
        Ok(rmp_serde::from_slice(bytes)?)
    }

    /// Count of operations per kind: `(mount, unmount, move, update)`.
    pub fn op_counts(&self) -> (usize, usize, usize, usize) {
        self.ops.iter().fold((0, 0, 0, 0), |(m, u, v, p), op| match op {
            Patch::Mount { .. } => (m + 1, u, v, p),
            Patch::Unmount { .. } => (m, u + 1, v, p),
            Patch::Move { .. } => (m, u, v + 1, p),
            Patch::Update { .. } => (m, u, v, p + 1),
        })
    }
}

/// An event from the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientEvent {
    pub widget_id: WidgetId,
    pub event_type: String,
    #[serde(default)]
    pub payload: Value,
}

impl ClientEvent {
    pub fn new(widget_id: WidgetId, event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            widget_id,
            event_type: event_type.into(),
            payload,
        }
    }

    pub fn from_json(input: &str) -> Result<Self> {
        serde_json::from_str(input).map_err(Error::Json)
    }
}

/// A serialized widget and its subtree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotNode {
    pub id: WidgetId,
    #[serde(rename = "type")]
    pub kind: String,
    pub props: IndexMap<String, Value>,
    pub children: Vec<SnapshotNode>,
}

/// The full tree, for hydrating a newly connected client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub session: SessionId,
    pub root: SnapshotNode,
}

impl Snapshot {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(Error::Json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn patch_uses_op_tag_and_camel_case() {
        let mount = Patch::Mount {
            parent_id: WidgetId::from(3),
            index: 1,
            node_id: WidgetId::from(9),
            kind: "text".into(),
            props: [("val".to_owned(), json!("b"))].into_iter().collect(),
        };
        assert_eq!(
            serde_json::to_value(&mount).unwrap(),
            json!({"op": "mount", "parentId": 3, "index": 1, "nodeId": 9, "type": "text", "props": {"val": "b"}})
        );

        let mv = Patch::Move {
            node_id: WidgetId::from(7),
            new_index: 0,
        };
        assert_eq!(
            serde_json::to_value(&mv).unwrap(),
            json!({"op": "move", "nodeId": 7, "newIndex": 0})
        );
    }

    #[test]
    fn msgpack_batch_decodes_back() {
        let batch = PatchBatch {
            session: SessionId::new(),
            seq: 4,
            ops: vec![
                Patch::Unmount {
                    node_id: WidgetId::from(2),
                },
                Patch::Update {
                    node_id: WidgetId::from(5),
                    field: "items".into(),
                    value: json!([1, {"a": null}]),
                },
            ],
        };
        let bytes = batch.to_msgpack().unwrap();
        assert_eq!(PatchBatch::from_msgpack(&bytes).unwrap(), batch);
        assert_eq!(batch.op_counts(), (0, 1, 0, 1));
    }

    #[test]
    fn client_event_payload_defaults_to_null() {
        let event = ClientEvent::from_json(r#"{"widgetId": 12, "eventType": "click"}"#).unwrap();
        assert_eq!(event.widget_id, WidgetId::from(12));
        assert_eq!(event.payload, Value::Null);
        assert!(ClientEvent::from_json("{").is_err());
    }
}
