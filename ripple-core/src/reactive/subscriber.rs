//! Side-effect subscriptions on state cells.
//!
//! A subscription is a callback attached to one cell, invoked with the new
//! and old value after every effective write. Subscriptions are not part of
//! the dependency graph: they never trigger recomputation and never produce
//! patches on their own.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use super::runtime::WeakRuntime;
use crate::graph::NodeId;

/// Unique identifier for a subscriber.
///
/// Uses an atomic counter so ids stay unique across sessions and threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

/// Returned by [`State::subscribe`](super::State::subscribe).
///
/// Dropping the subscription does not cancel it; call [`cancel`](Self::cancel).
#[derive(Clone)]
pub struct Subscription {
    cell: NodeId,
    id: SubscriberId,
    rt: WeakRuntime,
    active: Arc<AtomicBool>,
}

impl Subscription {
    pub(crate) fn new(cell: NodeId, id: SubscriberId, rt: WeakRuntime, active: bool) -> Self {
        Self {
            cell,
            id,
            rt,
            active: Arc::new(AtomicBool::new(active)),
        }
    }

    /// Detach the callback. Idempotent.
    pub fn cancel(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(rt) = self.rt.upgrade() {
            rt.with(|s| {
                if let Some(cell) = s.cells.get_mut(&self.cell) {
                    cell.subscribers.retain(|(id, _)| *id != self.id);
                }
            });
        }
    }

    /// Whether the callback is still attached.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// The subscriber's id.
    pub fn id(&self) -> SubscriberId {
        self.id
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("cell", &self.cell)
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}
