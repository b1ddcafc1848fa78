//! Session host.
//!
//! Every connected client gets its own [`Session`] running inside a tokio
//! task. The task owns the session outright and is the only thing that
//! touches it: client events arrive on a bounded channel and are handled
//! one at a time, and a timer applies updates posted by background work.
//! Different sessions share nothing and run in parallel.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::background::Updater;
use super::session::Session;
use super::sink::PatchSink;
use super::{SessionId, TeardownHandle};
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::render::{ClientEvent, Snapshot};
use crate::view::Ui;

type Script = Arc<dyn Fn(&mut Ui) + Send + Sync>;

enum Command {
    Event(ClientEvent),
    Close,
}

struct SessionEntry {
    tx: mpsc::Sender<Command>,
    last_seen: Mutex<Instant>,
    teardown: TeardownHandle,
    updater: Updater,
}

impl SessionEntry {
    fn touch(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    fn close(&self) {
        self.teardown.request();
        // A full queue means the task is busy; the raised flag stops it anyway.
        let _ = self.tx.try_send(Command::Close);
    }
}

/// Runs one session per connected client.
///
/// All methods that start sessions must be called from within a tokio
/// runtime.
pub struct SessionManager {
    config: SessionConfig,
    sessions: Arc<DashMap<SessionId, SessionEntry>>,
    script: Script,
}

impl SessionManager {
    /// `script` is the host script run to build every new session's tree.
    pub fn new<F>(config: SessionConfig, script: F) -> Self
    where
        F: Fn(&mut Ui) + Send + Sync + 'static,
    {
        Self {
            config,
            sessions: Arc::new(DashMap::new()),
            script: Arc::new(script),
        }
    }

    /// Build a session for a new client and start its task.
    ///
    /// Returns the session id and the initial tree. Batches produced later
    /// go to `sink`. When the host is full, the least recently active
    /// session is closed first.
    pub fn connect(&self, sink: impl PatchSink + 'static) -> Result<(SessionId, Snapshot)> {
        if self.sessions.len() >= self.config.max_sessions {
            self.evict_oldest();
        }

        let script = Arc::clone(&self.script);
        let mut session = Session::new(self.config.clone(), move |ui| script(ui))?;
        session.on_patch(sink);

        let id = session.id();
        let snapshot = session.snapshot();
        let (tx, rx) = mpsc::channel(self.config.event_queue_capacity.max(1));
        self.sessions.insert(
            id,
            SessionEntry {
                tx,
                last_seen: Mutex::new(Instant::now()),
                teardown: session.teardown_handle(),
                updater: session.updater(),
            },
        );

        let sessions = Arc::clone(&self.sessions);
        let interval = self.config.background_flush_interval();
        tokio::spawn(async move {
            run_session(session, rx, interval).await;
            sessions.remove(&id);
        });

        info!(session = %id, live = self.sessions.len(), "session connected");
        Ok((id, snapshot))
    }

    /// Queue a client event for its session.
    ///
    /// Waits while the session's queue is full.
    pub async fn dispatch(&self, id: SessionId, event: ClientEvent) -> Result<()> {
        let tx = {
            let entry = self.sessions.get(&id).ok_or(Error::UnknownSession(id))?;
            entry.touch();
            entry.tx.clone()
        };
        tx.send(Command::Event(event))
            .await
            .map_err(|_| Error::SessionClosed(id))
    }

    /// Close a session. Any batch it is still producing is discarded.
    ///
    /// Returns `false` if the session was not live.
    pub fn disconnect(&self, id: SessionId) -> bool {
        match self.sessions.remove(&id) {
            Some((_, entry)) => {
                entry.close();
                info!(session = %id, "session disconnected");
                true
            }
            None => false,
        }
    }

    /// Close every session idle for longer than the configured timeout.
    pub fn sweep_idle(&self) -> usize {
        let timeout = self.config.idle_timeout();
        let stale: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|entry| entry.idle_for() > timeout)
            .map(|entry| *entry.key())
            .collect();
        let closed = stale.into_iter().filter(|id| self.disconnect(*id)).count();
        if closed > 0 {
            debug!(closed, "idle sessions swept");
        }
        closed
    }

    fn evict_oldest(&self) {
        let oldest = self
            .sessions
            .iter()
            .max_by_key(|entry| entry.idle_for())
            .map(|entry| *entry.key());
        if let Some(id) = oldest {
            warn!(session = %id, max = self.config.max_sessions, "session limit reached; evicting");
            self.disconnect(id);
        }
    }

    /// Handle for posting background updates to a live session.
    pub fn updater(&self, id: SessionId) -> Option<Updater> {
        self.sessions.get(&id).map(|entry| entry.updater.clone())
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        for entry in self.sessions.iter() {
            entry.close();
        }
    }
}

async fn run_session(mut session: Session, mut rx: mpsc::Receiver<Command>, interval: Duration) {
    let id = session.id();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            command = rx.recv() => match command {
                Some(Command::Event(event)) => {
                    if let Err(err) = session.dispatch(event) {
                        warn!(session = %id, error = %err, "event rejected");
                    }
                }
                Some(Command::Close) | None => break,
            },
            _ = ticker.tick() => {
                session.pump();
            }
        }
        if session.is_torn_down() || session.teardown_handle().is_requested() {
            break;
        }
    }

    session.teardown();
    debug!(session = %id, "session task finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::State;
    use crate::render::{Patch, WidgetId};
    use crate::session::ChannelSink;
    use serde_json::json;

    fn counter_script(ui: &mut Ui) {
        let count = ui.state(0);
        ui.widget("text").key("label").prop("value", &count).mount();
        let inc = count.clone();
        ui.widget("button")
            .key("inc")
            .on("click", move |_| {
                inc.update(|v| v.as_i64().unwrap_or(0) + 1);
            })
            .mount();
    }

    fn button(snapshot: &Snapshot) -> WidgetId {
        snapshot.root.children[1].id
    }

    #[tokio::test]
    async fn events_reach_the_sink() {
        let host = SessionManager::new(SessionConfig::default(), counter_script);
        let (sink, mut rx) = ChannelSink::new();
        let (id, snapshot) = host.connect(sink).unwrap();

        host.dispatch(id, ClientEvent::new(button(&snapshot), "click", json!(null)))
            .await
            .unwrap();
        let batch = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(batch.seq, 1);
        assert!(matches!(&batch.ops[0], Patch::Update { value, .. } if *value == json!(1)));
    }

    #[tokio::test]
    async fn disconnect_forgets_the_session() {
        let host = SessionManager::new(SessionConfig::default(), counter_script);
        let (sink, _rx) = ChannelSink::new();
        let (id, snapshot) = host.connect(sink).unwrap();

        assert!(host.disconnect(id));
        assert!(!host.disconnect(id));
        let err = host
            .dispatch(id, ClientEvent::new(button(&snapshot), "click", json!(null)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownSession(_)));
    }

    #[tokio::test]
    async fn full_host_evicts_least_recent() {
        let config = SessionConfig {
            max_sessions: 1,
            ..SessionConfig::default()
        };
        let host = SessionManager::new(config, counter_script);
        let (first, _) = host.connect(ChannelSink::new().0).unwrap();
        let (second, _) = host.connect(ChannelSink::new().0).unwrap();

        assert_eq!(host.len(), 1);
        assert!(!host.contains(first));
        assert!(host.contains(second));
    }

    #[tokio::test]
    async fn idle_sessions_are_swept() {
        let config = SessionConfig {
            idle_timeout_secs: 0,
            ..SessionConfig::default()
        };
        let host = SessionManager::new(config, counter_script);
        host.connect(ChannelSink::new().0).unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(host.sweep_idle(), 1);
        assert!(host.is_empty());
    }

    #[tokio::test]
    async fn posted_updates_flush_on_interval() {
        let status: Arc<Mutex<Option<State>>> = Arc::default();
        let shared = Arc::clone(&status);
        let config = SessionConfig {
            background_flush_interval_ms: 10,
            ..SessionConfig::default()
        };
        let host = SessionManager::new(config, move |ui| {
            let cell = ui.state("working");
            ui.widget("text").prop("value", &cell).mount();
            *shared.lock() = Some(cell);
        });
        let (sink, mut rx) = ChannelSink::new();
        let (id, _) = host.connect(sink).unwrap();

        let cell = status.lock().clone().unwrap();
        assert!(host.updater(id).unwrap().post(move || {
            cell.write("done");
        }));

        let batch = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(&batch.ops[0], Patch::Update { value, .. } if *value == json!("done")));
    }
}
