//! Session boundary.
//!
//! A [`Session`] owns one runtime: its cells, computed nodes, widget tree
//! and dependency graph. It is what a transport talks to: it builds the
//! tree once, dispatches client events to handlers, flushes the resulting
//! changes as one [`PatchBatch`](crate::render::PatchBatch) per event, and
//! tears everything down on disconnect.
//!
//! [`SessionManager`] runs many sessions on a tokio runtime, one actor task
//! per session, and [`BackgroundTask`] moves long-running work off the
//! event path.

mod background;
mod host;
mod scheduler;
#[allow(clippy::module_inception)]
mod session;
mod sink;

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use background::{BackgroundTask, TaskContext, TaskError, TaskState, Updater};
pub use host::SessionManager;
pub use session::{DispatchOutcome, Session};
pub use sink::{ChannelSink, FnSink, PatchSink, VecSink};

/// Identity of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(u64);

impl SessionId {
    /// Generate a new unique session ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Shared flag raised when a session is being torn down.
///
/// Raising it makes the session discard any batch still in flight, and
/// makes background tasks observe cancellation.
#[derive(Debug, Clone, Default)]
pub struct TeardownHandle(Arc<AtomicBool>);

impl TeardownHandle {
    pub fn request(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}
