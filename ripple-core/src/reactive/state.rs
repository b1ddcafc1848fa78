//! State Cells
//!
//! A state cell is the fundamental reactive primitive: one mutable value
//! with a version and a set of dependents.
//!
//! # How State Cells Work
//!
//! 1. A cell is created once per slot key. Creating it again at the same
//!    key returns the existing cell with its current value, which is what
//!    keeps user input alive across structural rebuilds.
//!
//! 2. Reading a cell inside a computed evaluation subscribes the
//!    computation to it.
//!
//! 3. Writing a value equal to the stored one is a no-op. Any other write
//!    bumps the version, marks dependents dirty and queues the cell for the
//!    next flush.
//!
//! Handles are the `.value` of the framework: `read()` and `write(v)`.
//! A handle variable should not be rebound to another cell while closures
//! hold it; the closures keep pointing at the original cell.

use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use super::key::SlotKey;
use super::runtime::{Handle, Reactive, Runtime, WeakRuntime};
use super::subscriber::{SubscriberId, Subscription};
use super::value::ValueKind;
use crate::error::{Error, Result};
use crate::graph::{NodeId, NodeKind};

/// Side-effect callback: `(new, old)`.
pub(crate) type SubscriberFn = Arc<dyn Fn(&Value, &Value) + Send + Sync>;

/// Storage for one cell inside the runtime.
pub(crate) struct CellSlot {
    pub(crate) key: SlotKey,
    pub(crate) value: Value,
    pub(crate) version: u64,
    pub(crate) subscribers: Vec<(SubscriberId, SubscriberFn)>,
}

impl CellSlot {
    pub(crate) fn new(key: SlotKey, value: Value) -> Self {
        Self {
            key,
            value,
            version: 0,
            subscribers: Vec::new(),
        }
    }
}

impl Runtime {
    /// Create the cell at `key`, or return the one already there.
    pub(crate) fn create_cell(&self, key: SlotKey, initial: Value) -> Result<NodeId> {
        self.with(|s| {
            if let Some(&existing) = s.cell_keys.get(&key) {
                let current = s
                    .cells
                    .get(&existing)
                    .map(|cell| ValueKind::of(&cell.value))
                    .unwrap_or(ValueKind::Null);
                let incoming = ValueKind::of(&initial);
                if !current.is_compatible(incoming) {
                    return Err(Error::KeyCollision {
                        key,
                        existing: current,
                        incoming,
                    });
                }
                return Ok(existing);
            }

            let id = s.graph.add_node(NodeKind::Source);
            if let Some(record) = s.scopes.get_mut(key.scope()) {
                record.cells.push(id);
            }
            s.cell_keys.insert(key.clone(), id);
            s.cells.insert(id, CellSlot::new(key, initial));
            Ok(id)
        })
    }

    /// Store a value. Returns whether the write was effective.
    pub(crate) fn write_cell(&self, id: NodeId, value: Value, force: bool) -> Result<bool> {
        let effect = self.with(|s| {
            if s.phase == super::runtime::Phase::TornDown {
                return Err(Error::SessionClosed(s.session));
            }
            let cell = s.cells.get_mut(&id).ok_or(Error::Disposed(id))?;
            if !force && cell.value == value {
                return Ok(None);
            }

            let old = std::mem::replace(&mut cell.value, value);
            cell.version += 1;
            let callbacks: Vec<SubscriberFn> =
                cell.subscribers.iter().map(|(_, cb)| Arc::clone(cb)).collect();
            let new = cell.value.clone();

            s.graph.mark_changed(id);
            s.pending.insert(id);
            Ok(Some((callbacks, new, old)))
        })?;

        match effect {
            None => Ok(false),
            Some((callbacks, new, old)) => {
                for callback in callbacks {
                    callback(&new, &old);
                }
                Ok(true)
            }
        }
    }
}

/// Handle to a state cell.
///
/// Cloning the handle is cheap and yields another handle to the same cell.
#[derive(Clone, Debug)]
pub struct State {
    handle: Handle,
}

impl State {
    pub(crate) fn new(id: NodeId, rt: WeakRuntime) -> Self {
        Self {
            handle: Handle::new(id, rt),
        }
    }

    /// Write a new value. Equal values are ignored.
    ///
    /// Returns whether the write was effective.
    pub fn write(&self, value: impl Into<Value>) -> bool {
        self.write_logged(value.into(), false)
    }

    /// Write a new value, bumping the version even if it is equal.
    pub fn force(&self, value: impl Into<Value>) -> bool {
        self.write_logged(value.into(), true)
    }

    /// Write, reporting a disposed cell or closed session as an error.
    pub fn try_write(&self, value: impl Into<Value>) -> Result<bool> {
        let rt = self.handle.runtime().ok_or(Error::Disposed(self.id()))?;
        rt.write_cell(self.id(), value.into(), false)
    }

    /// Read-modify-write.
    pub fn update<F, V>(&self, f: F) -> bool
    where
        F: FnOnce(&Value) -> V,
        V: Into<Value>,
    {
        let current = self.peek();
        self.write(f(&current))
    }

    /// The current version. Starts at zero and increases by one per
    /// effective write.
    pub fn version(&self) -> u64 {
        self.handle
            .runtime()
            .and_then(|rt| rt.with(|s| s.cells.get(&self.id()).map(|c| c.version)))
            .unwrap_or(0)
    }

    /// Register a side-effect callback invoked with `(new, old)` after every
    /// effective write.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Value, &Value) + Send + Sync + 'static,
    {
        let subscriber = SubscriberId::new();
        let attached = self
            .handle
            .runtime()
            .map(|rt| {
                rt.with(|s| match s.cells.get_mut(&self.id()) {
                    Some(cell) => {
                        cell.subscribers.push((subscriber, Arc::new(callback)));
                        true
                    }
                    None => false,
                })
            })
            .unwrap_or(false);

        if !attached {
            warn!(node = %self.id(), "subscribe on a disposed cell");
        }
        Subscription::new(self.id(), subscriber, self.handle.weak_runtime(), attached)
    }

    /// The cell's id.
    pub fn id(&self) -> NodeId {
        self.handle.id()
    }

    /// Read without recording a dependency.
    fn peek(&self) -> Value {
        self.handle
            .runtime()
            .and_then(|rt| rt.with(|s| s.cells.get(&self.id()).map(|c| c.value.clone())))
            .unwrap_or(Value::Null)
    }

    fn write_logged(&self, value: Value, force: bool) -> bool {
        let Some(rt) = self.handle.runtime() else {
            warn!(node = %self.id(), "write to a cell whose session is gone");
            return false;
        };
        match rt.write_cell(self.id(), value, force) {
            Ok(effective) => effective,
            Err(err) => {
                warn!(node = %self.id(), error = %err, "write dropped");
                false
            }
        }
    }
}

impl Reactive for State {
    fn handle(&self) -> &Handle {
        &self.handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::ScopeId;
    use crate::session::SessionId;
    use serde_json::json;
    use std::sync::atomic::{AtomicI32, Ordering};

    fn named(name: &str) -> SlotKey {
        SlotKey::Named {
            scope: ScopeId::ROOT,
            name: name.into(),
        }
    }

    fn cell(rt: &Runtime, name: &str, initial: Value) -> State {
        let id = rt.create_cell(named(name), initial).unwrap();
        State::new(id, rt.downgrade())
    }

    #[test]
    fn state_read_and_write() {
        let rt = Runtime::new(SessionId::new());
        let count = cell(&rt, "count", json!(0));
        assert_eq!(count.read(), json!(0));

        assert!(count.write(42));
        assert_eq!(count.read(), json!(42));
        assert_eq!(count.read_as::<i64>().unwrap(), 42);
    }

    #[test]
    fn equal_write_is_a_no_op() {
        let rt = Runtime::new(SessionId::new());
        let name = cell(&rt, "name", json!("a"));

        assert!(name.write("b"));
        assert!(!name.write("b"));
        assert_eq!(name.version(), 1);
        assert_eq!(rt.with(|s| s.pending.len()), 1);
    }

    #[test]
    fn force_bumps_version_on_equal_value() {
        let rt = Runtime::new(SessionId::new());
        let flag = cell(&rt, "flag", json!(true));

        assert!(flag.force(true));
        assert_eq!(flag.version(), 1);
    }

    #[test]
    fn same_key_returns_existing_cell() {
        let rt = Runtime::new(SessionId::new());
        let first = cell(&rt, "user", json!("alice"));
        first.write("bob");

        let again = rt.create_cell(named("user"), json!("ignored")).unwrap();
        assert_eq!(again, first.id());
        assert_eq!(first.read(), json!("bob"));
    }

    #[test]
    fn incompatible_kind_at_same_key_collides() {
        let rt = Runtime::new(SessionId::new());
        cell(&rt, "slot", json!("text"));

        let err = rt.create_cell(named("slot"), json!(3)).unwrap_err();
        assert!(matches!(
            err,
            Error::KeyCollision {
                existing: ValueKind::String,
                incoming: ValueKind::Number,
                ..
            }
        ));
    }

    #[test]
    fn update_applies_function() {
        let rt = Runtime::new(SessionId::new());
        let n = cell(&rt, "n", json!(10));
        n.update(|v| v.as_i64().unwrap_or(0) + 5);
        assert_eq!(n.read(), json!(15));
    }

    #[test]
    fn subscribers_see_new_and_old() {
        let rt = Runtime::new(SessionId::new());
        let n = cell(&rt, "n", json!(1));
        let seen = Arc::new(AtomicI32::new(0));
        let seen_clone = seen.clone();

        let sub = n.subscribe(move |new, old| {
            let delta = new.as_i64().unwrap() - old.as_i64().unwrap();
            seen_clone.fetch_add(delta as i32, Ordering::SeqCst);
        });

        n.write(4);
        n.write(4);
        assert_eq!(seen.load(Ordering::SeqCst), 3);

        sub.cancel();
        n.write(10);
        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn handle_outliving_runtime_reads_null() {
        let rt = Runtime::new(SessionId::new());
        let n = cell(&rt, "n", json!(1));
        drop(rt);

        assert_eq!(n.read(), Value::Null);
        assert!(!n.write(2));
        assert!(matches!(n.try_write(2), Err(Error::Disposed(_))));
    }
}
