//! Widget tree and patch protocol.
//!
//! The session keeps the authoritative [`WidgetTree`]; the remote renderer
//! keeps a copy that it brings up to date by applying [`PatchBatch`]es in
//! order. [`ClientTree`] is such a copy, usable by transports and tests.
//!
//! The keyed diff in [`diff`] is the pure part of list reconciliation.

pub mod diff;
mod mirror;
mod patch;
mod tree;

pub use mirror::{ApplyReport, ClientTree};
pub use patch::{ClientEvent, Patch, PatchBatch, Snapshot, SnapshotNode};
pub use tree::{PropSlot, WidgetId, WidgetNode, WidgetTree};
