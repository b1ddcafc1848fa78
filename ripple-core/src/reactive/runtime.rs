//! Reactive Runtime
//!
//! The runtime is the per-session coordinator that connects state cells,
//! computed nodes, widget bindings and structural constructs. It owns the
//! dependency graph and the widget tree, and it is what every handle points
//! back to.
//!
//! # How It Works
//!
//! 1. When a cell is created, it registers with the runtime under its slot
//!    key.
//!
//! 2. When a computed node evaluates, every read it performs is recorded in
//!    the innermost tracking frame and becomes its new dependency set.
//!
//! 3. When a cell's value changes, the runtime:
//!    a. Marks direct dependents dirty and the rest downstream maybe-dirty
//!    b. Adds the cell to the pending set of the next flush
//!    c. Runs the cell's side-effect subscribers
//!    d. Computed nodes stay lazy - they recompute on read or at flush
//!
//! # Locking
//!
//! State lives behind one mutex per session. User code (compute functions,
//! event handlers, subtree builders, subscribers) never runs while the lock
//! is held: every operation takes the lock for a short section, releases
//! it, calls out, and re-locks to store results.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use indexmap::{IndexMap, IndexSet};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use smallvec::SmallVec;
use tracing::{error, trace, warn};

use super::computed::{Computed, ComputedSlot};
use super::context::{ReactiveContext, TrackingFrame};
use super::key::{ScopeId, SlotKey};
use super::state::CellSlot;
use crate::error::{Error, Result};
use crate::graph::{DependencyGraph, GraphError, NodeId, NodeKind};
use crate::render::{Patch, WidgetId, WidgetTree};
use crate::session::SessionId;
use crate::view::{BindingSlot, Handler, ScopeTable, StructureSlot};

/// Lifecycle phase of a session's runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// The build script is running; no client exists yet.
    Building,
    /// Waiting for events.
    Idle,
    /// An event callback is running.
    Callback,
    /// The patch scheduler is running.
    Flushing,
    /// Everything has been released.
    TornDown,
}

/// Mutable state of one session.
pub(crate) struct RuntimeState {
    pub(crate) session: SessionId,
    pub(crate) phase: Phase,
    pub(crate) graph: DependencyGraph,
    pub(crate) cells: HashMap<NodeId, CellSlot>,
    pub(crate) computeds: HashMap<NodeId, ComputedSlot>,
    pub(crate) bindings: HashMap<NodeId, BindingSlot>,
    pub(crate) structures: HashMap<NodeId, StructureSlot>,
    pub(crate) tree: WidgetTree,
    pub(crate) scopes: ScopeTable,
    pub(crate) cell_keys: HashMap<SlotKey, NodeId>,
    pub(crate) widget_keys: HashMap<SlotKey, WidgetId>,
    pub(crate) handlers: HashMap<WidgetId, IndexMap<String, Handler>>,
    pub(crate) tracking: Vec<TrackingFrame>,
    pub(crate) scope_stack: Vec<ScopeId>,
    /// Cells written since the last flush, in write order.
    pub(crate) pending: IndexSet<NodeId>,
    /// Structural operations of the flush in progress.
    pub(crate) collecting: Option<Vec<Patch>>,
    /// A cycle detected inside an evaluation whose read was swallowed.
    pub(crate) fault: Option<Error>,
    /// First structural fault raised while building; aborts the build.
    pub(crate) build_fault: Option<Error>,
    pub(crate) batch_seq: u64,
}

impl RuntimeState {
    fn new(session: SessionId) -> Self {
        Self {
            session,
            phase: Phase::Building,
            graph: DependencyGraph::new(),
            cells: HashMap::new(),
            computeds: HashMap::new(),
            bindings: HashMap::new(),
            structures: HashMap::new(),
            tree: WidgetTree::new(),
            scopes: ScopeTable::new(),
            cell_keys: HashMap::new(),
            widget_keys: HashMap::new(),
            handlers: HashMap::new(),
            tracking: Vec::new(),
            scope_stack: Vec::new(),
            pending: IndexSet::new(),
            collecting: None,
            fault: None,
            build_fault: None,
            batch_seq: 0,
        }
    }

    /// Current value and version of a readable node.
    pub(crate) fn node_value(&self, id: NodeId) -> Option<(Value, u64)> {
        if let Some(cell) = self.cells.get(&id) {
            return Some((cell.value.clone(), cell.version));
        }
        self.computeds
            .get(&id)
            .map(|c| (c.value.clone().unwrap_or(Value::Null), c.version))
    }

    pub(crate) fn node_version(&self, id: NodeId) -> Option<u64> {
        if let Some(cell) = self.cells.get(&id) {
            return Some(cell.version);
        }
        self.computeds.get(&id).map(|c| c.version)
    }

    pub(crate) fn is_evaluating(&self, id: NodeId) -> bool {
        self.tracking.iter().any(|frame| frame.owner() == Some(id))
    }

    /// The scope new unscoped nodes (e.g. `map` results) belong to.
    pub(crate) fn current_scope(&self) -> ScopeId {
        self.scope_stack.last().copied().unwrap_or(ScopeId::ROOT)
    }

    pub(crate) fn record_fault(&mut self, err: Error) {
        if !self.tracking.is_empty() && self.fault.is_none() {
            self.fault = Some(err);
        }
    }

    /// Push a structural operation if a flush is collecting them.
    pub(crate) fn emit(&mut self, patch: Patch) {
        if let Some(ops) = self.collecting.as_mut() {
            ops.push(patch);
        }
    }
}

/// Shared handle to a session's runtime.
#[derive(Clone)]
pub(crate) struct Runtime {
    inner: Arc<Mutex<RuntimeState>>,
}

/// Non-owning handle to a runtime; what reactive handles hold so that
/// closures stored in the runtime do not keep it alive.
#[derive(Clone)]
pub(crate) struct WeakRuntime {
    inner: Weak<Mutex<RuntimeState>>,
}

impl WeakRuntime {
    pub(crate) fn upgrade(&self) -> Option<Runtime> {
        self.inner.upgrade().map(|inner| Runtime { inner })
    }

    pub(crate) fn dangling() -> Self {
        Self { inner: Weak::new() }
    }
}

impl Runtime {
    pub(crate) fn new(session: SessionId) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RuntimeState::new(session))),
        }
    }

    /// Run `f` with the state locked. `f` must not call back into the
    /// runtime or into user code.
    pub(crate) fn with<R>(&self, f: impl FnOnce(&mut RuntimeState) -> R) -> R {
        f(&mut self.inner.lock())
    }

    pub(crate) fn downgrade(&self) -> WeakRuntime {
        WeakRuntime {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub(crate) fn phase(&self) -> Phase {
        self.with(|s| s.phase)
    }

    pub(crate) fn set_phase(&self, phase: Phase) {
        self.with(|s| {
            if s.phase != Phase::TornDown {
                s.phase = phase;
            }
        });
    }

    /// Route a fault: while building it aborts the build, afterwards it is
    /// logged and the operation that raised it is skipped.
    pub(crate) fn report(&self, err: Error) {
        self.with(|s| {
            if s.phase == Phase::Building {
                if s.build_fault.is_none() {
                    s.build_fault = Some(err);
                }
            } else {
                error!(session = %s.session, error = %err, "fault isolated to one operation");
            }
        });
    }

    /// Read a cell or computed node, recording the read in the innermost
    /// tracking frame.
    pub(crate) fn read_node(&self, id: NodeId) -> Result<Value> {
        let kind = self.with(|s| s.graph.kind(id)).ok_or(Error::Disposed(id))?;
        if kind == NodeKind::Derived {
            self.ensure_fresh(id)?;
        } else if !kind.is_readable() {
            return Err(Error::Disposed(id));
        }

        self.with(|s| {
            let (value, version) = s.node_value(id).ok_or(Error::Disposed(id))?;
            if let Some(frame) = s.tracking.last_mut() {
                frame.record(id, version);
            }
            Ok(value)
        })
    }

    /// Bring a computed node up to date without reading it.
    ///
    /// A clean node is returned as is. A dirty or maybe-dirty node first
    /// refreshes its computed dependencies, then recomputes only if one of
    /// the versions it saw last time has moved.
    pub(crate) fn ensure_fresh(&self, id: NodeId) -> Result<()> {
        enum Check {
            Fresh,
            Verify(SmallVec<[(NodeId, u64); 4]>),
            Recompute,
        }

        let check = self.with(|s| {
            if s.is_evaluating(id) {
                let err = Error::Cycle { node: id };
                s.record_fault(Error::Cycle { node: id });
                return Err(err);
            }
            let slot = s.computeds.get(&id).ok_or(Error::Disposed(id))?;
            if slot.value.is_none() {
                return Ok(Check::Recompute);
            }
            match s.graph.dirty_state(id) {
                Some(crate::graph::DirtyState::Clean) => Ok(Check::Fresh),
                Some(_) => Ok(Check::Verify(slot.dep_versions.clone())),
                None => Err(Error::Disposed(id)),
            }
        })?;

        match check {
            Check::Fresh => Ok(()),
            Check::Recompute => self.recompute(id),
            Check::Verify(deps) => {
                for (dep, _) in &deps {
                    let is_derived = self.with(|s| s.graph.kind(*dep) == Some(NodeKind::Derived));
                    if is_derived {
                        match self.ensure_fresh(*dep) {
                            Ok(()) | Err(Error::Disposed(_)) => {}
                            Err(err) => return Err(err),
                        }
                    }
                }
                let stale = self.with(|s| {
                    deps.iter()
                        .any(|(dep, seen)| s.node_version(*dep) != Some(*seen))
                });
                if stale {
                    self.recompute(id)
                } else {
                    self.with(|s| s.graph.mark_clean([id]));
                    Ok(())
                }
            }
        }
    }

    /// Evaluate a computed node inside a fresh tracking frame and install
    /// the dependency set it read.
    fn recompute(&self, id: NodeId) -> Result<()> {
        let compute = self
            .with(|s| s.computeds.get(&id).map(|c| Arc::clone(&c.compute)))
            .ok_or(Error::Disposed(id))?;

        let ctx = ReactiveContext::enter(self, Some(id));
        let value = compute();
        let reads = ctx.finish();

        self.with(|s| {
            if s.fault.is_some() {
                return match s.tracking.is_empty() {
                    true => Err(s.fault.take().unwrap_or(Error::Cycle { node: id })),
                    false => Err(Error::Cycle { node: id }),
                };
            }

            let deps: SmallVec<[NodeId; 4]> = reads
                .iter()
                .map(|(dep, _)| *dep)
                .filter(|dep| s.graph.contains(*dep))
                .collect();
            if let Err(err) = s.graph.set_dependencies(id, &deps) {
                return Err(match err {
                    GraphError::Cycle { .. } => {
                        let cycle = Error::Cycle { node: id };
                        s.record_fault(Error::Cycle { node: id });
                        cycle
                    }
                    other => other.into(),
                });
            }

            let slot = s.computeds.get_mut(&id).ok_or(Error::Disposed(id))?;
            let changed = slot.value.as_ref() != Some(&value);
            if changed {
                slot.version += 1;
                slot.value = Some(value);
            }
            slot.dep_versions = reads;
            s.graph.mark_clean([id]);
            trace!(node = %id, changed, deps = deps.len(), "recomputed");
            Ok(())
        })
    }

    /// Register a lazily evaluated computed node in the current scope.
    ///
    /// Outside any region (an event handler, a background update) that is
    /// the root scope, which lives until teardown.
    pub(crate) fn create_computed(&self, compute: Arc<dyn Fn() -> Value + Send + Sync>) -> NodeId {
        self.with(|s| {
            let id = s.graph.add_node(NodeKind::Derived);
            s.computeds.insert(id, ComputedSlot::new(compute));
            let scope = s.current_scope();
            if s.phase == Phase::Callback && s.scope_stack.is_empty() {
                warn!(
                    session = %s.session,
                    node = %id,
                    "computed node created in a callback is kept until teardown; derive it in the build script"
                );
            }
            if let Some(record) = s.scopes.get_mut(scope) {
                record.computeds.push(id);
            }
            id
        })
    }
}

/// A reference from a handle to its node and runtime.
#[derive(Clone)]
pub struct Handle {
    id: NodeId,
    rt: WeakRuntime,
}

impl Handle {
    pub(crate) fn new(id: NodeId, rt: WeakRuntime) -> Self {
        Self { id, rt }
    }

    pub(crate) fn runtime(&self) -> Option<Runtime> {
        self.rt.upgrade()
    }

    pub(crate) fn weak_runtime(&self) -> WeakRuntime {
        self.rt.clone()
    }

    /// The node this handle points to.
    pub fn id(&self) -> NodeId {
        self.id
    }

    fn fetch(&self) -> Result<Value> {
        let rt = self.runtime().ok_or(Error::Disposed(self.id))?;
        rt.read_node(self.id)
    }
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle").field("id", &self.id).finish()
    }
}

/// A readable reactive value: a state cell or a computed node.
///
/// Reads inside a computed evaluation are tracked as dependencies.
pub trait Reactive {
    /// The underlying handle.
    fn handle(&self) -> &Handle;

    /// The graph node backing this value.
    fn node_id(&self) -> NodeId {
        self.handle().id()
    }

    /// Read the current value.
    fn try_read(&self) -> Result<Value> {
        self.handle().fetch()
    }

    /// Read the current value, or `Null` if the node is gone.
    fn read(&self) -> Value {
        match self.try_read() {
            Ok(value) => value,
            Err(err) => {
                warn!(node = %self.node_id(), error = %err, "read failed");
                Value::Null
            }
        }
    }

    /// Read and deserialize the current value.
    fn read_as<T: DeserializeOwned>(&self) -> Result<T>
    where
        Self: Sized,
    {
        serde_json::from_value(self.try_read()?).map_err(Error::Decode)
    }

    /// Derive a computed node from this value.
    ///
    /// Each call creates a node owned by the current scope. Call it while
    /// building, not from event handlers.
    fn map<F, V>(&self, f: F) -> Computed
    where
        Self: Sized,
        F: Fn(&Value) -> V + Send + Sync + 'static,
        V: Into<Value>,
    {
        let source = self.handle().clone();
        Computed::from_fn(&source.weak_runtime(), move || {
            let value = Reactive::read(&source);
            f(&value).into()
        })
    }
}

impl Reactive for Handle {
    fn handle(&self) -> &Handle {
        self
    }
}
