//! Dependency Graph
//!
//! The directed acyclic graph that connects state cells to everything that
//! reads them.
//!
//! # Overview
//!
//! - Nodes are state cells (sources), computed nodes (derived), widget
//!   property bindings and structural constructs (both leaves).
//! - Edges point from a dependency to its dependent: if A reads B there is
//!   an edge from B to A.
//!
//! When a cell changes we mark everything downstream dirty. The flush then
//! walks the dirty region in topological order.
//!
//! # Design Decisions
//!
//! 1. The graph is centralized per session rather than spread over the
//!    handles, which makes topological ordering and cycle checks cheap.
//!
//! 2. Nodes are indexed by ID for O(1) lookups.
//!
//! 3. Both forward and reverse edges are stored so traversal works in both
//!    directions.

mod dag;
mod node;

pub use dag::{DependencyGraph, GraphError};
pub use node::{DirtyState, Node, NodeId, NodeKind};
