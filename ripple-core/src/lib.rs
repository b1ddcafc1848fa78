//! Ripple Core
//!
//! This crate provides the reactive state engine behind the Ripple
//! server-driven UI framework. The server holds the widget tree and all
//! application state; the client only renders what it is told and sends
//! events back. It implements:
//!
//! - State cells and lazily cached computed nodes
//! - A widget tree with properties bound to reactive values
//! - Branch-select and keyed-list constructs with stable item identity
//! - A patch scheduler that turns a batch of writes into minimal patches
//! - Sessions, a multi-session host and background work
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: State cells, computed nodes and dependency tracking
//! - `graph`: Dependency graph with dirty propagation and topological order
//! - `render`: Widget tree, patch wire format and keyed diff
//! - `view`: Build-time API used by host scripts
//! - `session`: Session lifecycle, patch scheduling and the session host
//!
//! # Example
//!
//! ```rust
//! use ripple_core::{Patch, Session, SessionConfig};
//! use serde_json::json;
//!
//! let mut session = Session::new(SessionConfig::default(), |ui| {
//!     let count = ui.state(0);
//!     let label = ui.format("clicked {} times", &[&count]);
//!     ui.widget("text").key("label").prop("value", &label).mount();
//!     let clicks = count.clone();
//!     ui.widget("button")
//!         .key("inc")
//!         .prop("label", "+")
//!         .on("click", move |_| {
//!             clicks.update(|v| v.as_i64().unwrap_or(0) + 1);
//!         })
//!         .mount();
//! })
//! .unwrap();
//!
//! let button = session.find_widget("inc").unwrap();
//! let outcome = session.dispatch_event(button, "click", json!(null)).unwrap();
//! let batch = outcome.batch().unwrap();
//! assert!(matches!(
//!     &batch.ops[0],
//!     Patch::Update { value, .. } if value == &json!("clicked 1 times")
//! ));
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod reactive;
pub mod render;
pub mod session;
pub mod view;

pub use serde_json::Value;

pub use config::SessionConfig;
pub use error::{Error, Result};
pub use reactive::{format, zip_with, Computed, Reactive, State, Subscription};
pub use render::{ClientEvent, ClientTree, Patch, PatchBatch, Snapshot, SnapshotNode, WidgetId};
pub use session::{
    BackgroundTask, ChannelSink, DispatchOutcome, PatchSink, Session, SessionId, SessionManager, TaskContext,
    TaskError, TaskState, Updater, VecSink,
};
pub use view::{Dialog, Item, ListKey, Prop, Ui, WidgetBuilder};
