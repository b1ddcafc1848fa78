//! A single client session.

use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::background::{Update, Updater};
use super::sink::PatchSink;
use super::{SessionId, TeardownHandle};
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::reactive::{Phase, Runtime, ScopeId, SlotKey};
use crate::render::{ClientEvent, PatchBatch, Snapshot, SnapshotNode, WidgetId, WidgetTree};
use crate::view::Ui;

/// What happened to a dispatched event.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// No handler for this widget and event; nothing ran.
    Dropped,
    /// The handler ran. `batch` is what the flush after it produced.
    Handled { batch: Option<PatchBatch> },
}

impl DispatchOutcome {
    /// The batch the handler produced, if any.
    pub fn batch(&self) -> Option<&PatchBatch> {
        match self {
            DispatchOutcome::Handled { batch } => batch.as_ref(),
            DispatchOutcome::Dropped => None,
        }
    }

    /// Whether no handler ran.
    pub fn is_dropped(&self) -> bool {
        matches!(self, DispatchOutcome::Dropped)
    }
}

/// One connected client's reactive state and widget tree.
///
/// Events for a session are handled one at a time, each to completion
/// (callback, then flush) before the next.
pub struct Session {
    id: SessionId,
    rt: Runtime,
    config: SessionConfig,
    sink: Option<Box<dyn PatchSink>>,
    teardown: TeardownHandle,
    updater: Updater,
    updates: mpsc::UnboundedReceiver<Update>,
}

impl Session {
    /// Create an empty session. Describe its tree with [`build`](Self::build).
    pub fn create(config: SessionConfig) -> Self {
        let id = SessionId::new();
        let teardown = TeardownHandle::default();
        let (tx, updates) = mpsc::unbounded_channel();
        debug!(session = %id, "session created");
        Self {
            id,
            rt: Runtime::new(id),
            config,
            sink: None,
            updater: Updater::new(id, tx, teardown.clone()),
            teardown,
            updates,
        }
    }

    /// Create and build in one step.
    pub fn new<F>(config: SessionConfig, script: F) -> Result<Self>
    where
        F: FnOnce(&mut Ui),
    {
        let mut session = Self::create(config);
        session.build(script)?;
        Ok(session)
    }

    /// Run the host script once to build the initial tree.
    ///
    /// Writes made while building apply immediately and are settled before
    /// this returns; no batch is produced. A dependency cycle or key
    /// collision raised while building tears the session down and is
    /// returned.
    pub fn build<F>(&mut self, script: F) -> Result<()>
    where
        F: FnOnce(&mut Ui),
    {
        match self.rt.phase() {
            Phase::Building => {}
            Phase::TornDown => return Err(Error::SessionClosed(self.id)),
            _ => {
                warn!(session = %self.id, "session already built");
                return Ok(());
            }
        }

        self.rt.run_region(ScopeId::ROOT, WidgetId::ROOT, 0, script);
        if let Some(err) = self.take_build_fault() {
            self.teardown();
            return Err(err);
        }

        self.rt.flush(self.config.max_flush_rounds);
        if let Some(err) = self.take_build_fault() {
            self.teardown();
            return Err(err);
        }

        self.rt.set_phase(Phase::Idle);
        debug!(session = %self.id, widgets = self.rt.with(|s| s.tree.len()), "session built");
        Ok(())
    }

    fn take_build_fault(&self) -> Option<Error> {
        self.rt.with(|s| s.build_fault.take())
    }

    /// Register the sink batches are delivered to. Replaces any previous one.
    pub fn on_patch(&mut self, sink: impl PatchSink + 'static) {
        self.sink = Some(Box::new(sink));
    }

    /// Run the handler bound to `event` on `widget`, then flush.
    ///
    /// An event for a widget that is not in the tree (a stale client) or
    /// that has no handler is dropped and logged.
    pub fn dispatch_event(&mut self, widget: WidgetId, event: &str, payload: serde_json::Value) -> Result<DispatchOutcome> {
        if self.is_torn_down() {
            return Err(Error::SessionClosed(self.id));
        }

        let (handler, known) = self.rt.with(|s| {
            let handler = s.handlers.get(&widget).and_then(|h| h.get(event)).cloned();
            (handler, s.tree.contains(widget))
        });
        let Some(handler) = handler else {
            if known {
                debug!(session = %self.id, widget = %widget, event, "no handler for event");
            } else {
                warn!(session = %self.id, widget = %widget, event, "event for unknown widget dropped");
            }
            return Ok(DispatchOutcome::Dropped);
        };

        self.rt.set_phase(Phase::Callback);
        handler(&payload);
        self.rt.set_phase(Phase::Idle);

        Ok(DispatchOutcome::Handled { batch: self.flush() })
    }

    /// [`dispatch_event`](Self::dispatch_event) for a decoded client event.
    pub fn dispatch(&mut self, event: ClientEvent) -> Result<DispatchOutcome> {
        self.dispatch_event(event.widget_id, &event.event_type, event.payload)
    }

    /// Flush pending writes, deliver the batch to the sink and return it.
    ///
    /// Returns `None` when nothing changed, and when the session is being
    /// torn down (the batch is discarded).
    pub fn flush(&mut self) -> Option<PatchBatch> {
        if self.is_torn_down() {
            return None;
        }
        let ops = self.rt.flush(self.config.max_flush_rounds);
        if ops.is_empty() {
            return None;
        }
        if self.teardown.is_requested() || self.is_torn_down() {
            debug!(session = %self.id, ops = ops.len(), "session closing; batch discarded");
            self.teardown();
            return None;
        }

        let seq = self.rt.with(|s| {
            s.batch_seq += 1;
            s.batch_seq
        });
        let batch = PatchBatch {
            session: self.id,
            seq,
            ops,
        };
        let (mounts, unmounts, moves, updates) = batch.op_counts();
        debug!(session = %self.id, seq, mounts, unmounts, moves, updates, "batch emitted");
        if let Some(sink) = self.sink.as_mut() {
            sink.deliver(batch.clone());
        }
        Some(batch)
    }

    /// Apply updates posted by background tasks, without flushing.
    ///
    /// Returns how many were applied.
    pub fn drain_updates(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(update) = self.updates.try_recv() {
            if self.is_torn_down() {
                break;
            }
            self.rt.set_phase(Phase::Callback);
            update();
            self.rt.set_phase(Phase::Idle);
            applied += 1;
        }
        applied
    }

    /// Apply posted updates and flush if there were any.
    pub fn pump(&mut self) -> Option<PatchBatch> {
        if self.drain_updates() == 0 {
            return None;
        }
        self.flush()
    }

    /// A handle background work uses to post updates to this session.
    pub fn updater(&self) -> Updater {
        self.updater.clone()
    }

    /// The flag that, once raised, makes this session discard in-flight
    /// batches.
    pub fn teardown_handle(&self) -> TeardownHandle {
        self.teardown.clone()
    }

    /// The full current tree.
    pub fn snapshot(&self) -> Snapshot {
        let root = self.rt.with(|s| s.tree.snapshot_from(WidgetId::ROOT)).unwrap_or_else(|| SnapshotNode {
            id: WidgetId::ROOT,
            kind: "root".to_owned(),
            props: Default::default(),
            children: Vec::new(),
        });
        Snapshot {
            session: self.id,
            root,
        }
    }

    /// Look up a widget created at the top level of the script with an
    /// explicit key.
    pub fn find_widget(&self, name: &str) -> Option<WidgetId> {
        let key = SlotKey::Named {
            scope: ScopeId::ROOT,
            name: name.to_owned(),
        };
        self.rt.with(|s| s.widget_keys.get(&key).copied())
    }

    /// Release every cell, computed node, binding and widget. Idempotent.
    pub fn teardown(&mut self) {
        self.teardown.request();
        let released = self.rt.with(|s| {
            if s.phase == Phase::TornDown {
                return None;
            }
            s.phase = Phase::TornDown;
            let released = s.cells.len() + s.computeds.len();
            s.cells.clear();
            s.computeds.clear();
            s.bindings.clear();
            s.structures.clear();
            s.handlers.clear();
            s.cell_keys.clear();
            s.widget_keys.clear();
            s.pending.clear();
            s.collecting = None;
            s.graph.clear();
            s.tree = WidgetTree::new();
            s.scopes = crate::view::ScopeTable::new();
            Some(released)
        });
        self.sink = None;
        self.updates.close();
        if let Some(released) = released {
            debug!(session = %self.id, released, "session torn down");
        }
    }

    /// This session's id.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// The configuration the session was created with.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Where the session is in its lifecycle.
    pub fn phase(&self) -> Phase {
        self.rt.phase()
    }

    /// Whether [`teardown`](Self::teardown) has run.
    pub fn is_torn_down(&self) -> bool {
        self.rt.phase() == Phase::TornDown
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("phase", &self.phase())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Reactive;
    use crate::render::Patch;
    use crate::session::VecSink;
    use serde_json::json;

    fn counter() -> (Session, WidgetId, WidgetId) {
        let session = Session::new(SessionConfig::default(), |ui| {
            let count = ui.state(0);
            let label = ui.format("count: {}", &[&count]);
            ui.widget("text").key("label").prop("value", &label).mount();
            let inc = count.clone();
            ui.widget("button")
                .key("inc")
                .prop("label", "+")
                .on("click", move |_| {
                    inc.update(|v| v.as_i64().unwrap_or(0) + 1);
                })
                .mount();
        })
        .unwrap();
        let label = session.find_widget("label").unwrap();
        let inc = session.find_widget("inc").unwrap();
        (session, label, inc)
    }

    #[test]
    fn click_produces_one_update() {
        let (mut session, label, inc) = counter();
        let sink = VecSink::new();
        session.on_patch(sink.clone());

        let outcome = session.dispatch_event(inc, "click", json!(null)).unwrap();
        let batch = outcome.batch().unwrap();
        assert_eq!(batch.seq, 1);
        assert_eq!(
            batch.ops,
            vec![Patch::Update {
                node_id: label,
                field: "value".into(),
                value: json!("count: 1"),
            }]
        );
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn writes_during_build_settle_silently() {
        let mut session = Session::new(SessionConfig::default(), |ui| {
            let name = ui.state("a");
            ui.widget("text").key("t").prop("value", &name).mount();
            name.write("b");
        })
        .unwrap();

        let snap = session.snapshot();
        assert_eq!(snap.root.children[0].props["value"], json!("b"));
        assert!(session.flush().is_none());
        assert_eq!(session.phase(), Phase::Idle);
    }

    #[test]
    fn unknown_widget_is_dropped() {
        let (mut session, _, _) = counter();
        let outcome = session.dispatch_event(WidgetId::from(9999), "click", json!(null)).unwrap();
        assert!(outcome.is_dropped());
    }

    #[test]
    fn key_collision_aborts_build() {
        let result = Session::new(SessionConfig::default(), |ui| {
            ui.state_keyed("slot", "text");
            ui.state_keyed("slot", 5);
        });
        assert!(matches!(result, Err(Error::KeyCollision { .. })));
    }

    #[test]
    fn teardown_closes_the_session() {
        let (mut session, _, inc) = counter();
        session.teardown();
        assert!(session.is_torn_down());
        assert!(matches!(
            session.dispatch_event(inc, "click", json!(null)),
            Err(Error::SessionClosed(_))
        ));
        assert!(session.flush().is_none());
        session.teardown();
    }

    #[test]
    fn requested_teardown_discards_the_batch() {
        let (mut session, _, inc) = counter();
        let sink = VecSink::new();
        session.on_patch(sink.clone());
        session.teardown_handle().request();

        let outcome = session.dispatch_event(inc, "click", json!(null)).unwrap();
        assert!(outcome.batch().is_none());
        assert!(sink.is_empty());
        assert!(session.is_torn_down());
    }

    #[test]
    fn posted_updates_apply_on_pump() {
        let mut session = Session::new(SessionConfig::default(), |ui| {
            let status = ui.state_keyed("status", "idle");
            ui.widget("text").prop("value", &status).mount();
        })
        .unwrap();

        let status = session.rt.with(|s| {
            s.cell_keys
                .get(&SlotKey::Named {
                    scope: ScopeId::ROOT,
                    name: "status".into(),
                })
                .copied()
        });
        let status = crate::reactive::State::new(status.unwrap(), session.rt.downgrade());
        let updater = session.updater();
        let target = status.clone();
        assert!(updater.post(move || {
            target.write("done");
        }));

        let batch = session.pump().unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(status.read(), json!("done"));
        assert!(session.pump().is_none());
    }
}
