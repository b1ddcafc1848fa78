//! Error types.
//!
//! Structural and graph-integrity faults (`Cycle`, `KeyCollision`) abort
//! session construction. Everything else is reported to the caller of the
//! single operation that failed.

use thiserror::Error;

use crate::graph::{GraphError, NodeId};
use crate::reactive::{SlotKey, ValueKind};
use crate::session::SessionId;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the reactive engine and the session host.
#[derive(Debug, Error)]
pub enum Error {
    /// A computed node read itself, directly or through other nodes.
    #[error("dependency cycle through node {node}")]
    Cycle {
        /// The node whose evaluation closed the cycle.
        node: NodeId,
    },

    /// Two state cells resolved to the same key with incompatible values.
    #[error("key collision at {key}: existing {existing:?} value, new {incoming:?} value")]
    KeyCollision {
        /// The resolved slot key.
        key: SlotKey,
        /// Kind of the value already stored at the key.
        existing: ValueKind,
        /// Kind of the initial value passed by the second caller.
        incoming: ValueKind,
    },

    /// The handle refers to a node (or session) that no longer exists.
    #[error("node {0} has been disposed")]
    Disposed(NodeId),

    /// The session was torn down.
    #[error("session {0} is closed")]
    SessionClosed(SessionId),

    /// The host has no session with this id.
    #[error("unknown session {0}")]
    UnknownSession(SessionId),

    /// Dependency graph integrity error.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// A value could not be converted to the requested type.
    #[error("value decode failed: {0}")]
    Decode(#[source] serde_json::Error),

    /// A wire message could not be encoded or decoded as JSON.
    #[error("json codec failed: {0}")]
    Json(#[source] serde_json::Error),

    /// A patch batch could not be encoded.
    #[error("patch encode failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// A MessagePack patch batch could not be decoded.
    #[error("patch decode failed: {0}")]
    DecodeBatch(#[from] rmp_serde::decode::Error),

    /// Configuration could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(#[source] serde_json::Error),
}

impl Error {
    /// Whether this error is a construction-time fault that must abort the
    /// session build.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Error::Cycle { .. } | Error::KeyCollision { .. } | Error::Graph(GraphError::Cycle { .. })
        )
    }
}
