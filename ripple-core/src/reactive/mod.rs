//! Reactive Primitives
//!
//! This module implements the core reactive system: state cells and
//! computed nodes, plus the runtime that ties them to one session.
//!
//! # Concepts
//!
//! ## State Cells
//!
//! A [`State`] is a container for mutable state. When a cell is read while
//! a computed node is evaluating, the read registers the computation as a
//! dependent. When the cell's value changes, dependents are marked dirty
//! and the cell is queued for the session's next flush.
//!
//! ## Computed Nodes
//!
//! A [`Computed`] is a derived value that caches its result. It
//! re-evaluates only when one of its dependencies changed, and only when
//! someone reads it or a flush needs it.
//!
//! # Implementation Notes
//!
//! Each session has its own runtime with its own tracking stack; nothing is
//! shared between sessions and there is no global context. Handles keep a
//! weak reference to their runtime.
//!
//! This approach (sometimes called "automatic dependency tracking" or
//! "transparent reactivity") is used by SolidJS, Vue 3, and Leptos.

mod computed;
mod context;
mod key;
pub(crate) mod runtime;
mod state;
mod subscriber;
mod value;

pub use computed::{format, zip_with, Computed};
pub use key::{CallSite, ScopeId, SlotKey};
pub use runtime::{Handle, Phase, Reactive};
pub use state::State;
pub use subscriber::{SubscriberId, Subscription};
pub use value::{display, truthy, ValueKind};

pub(crate) use computed::render_template;
pub(crate) use context::{ReactiveContext, Reads};
pub(crate) use runtime::{Runtime, RuntimeState, WeakRuntime};
