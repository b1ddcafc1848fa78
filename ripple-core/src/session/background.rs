//! Background work.
//!
//! Long-running work runs on tokio's blocking pool, off the session's
//! event path. It never touches session state from the worker thread:
//! it posts closures through an [`Updater`], and the session applies them
//! between events and flushes them on its background interval, so
//! progress shows up while the work is still running.
//!
//! Cancellation is cooperative: the work calls
//! [`TaskContext::check_cancelled`] at convenient points.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use super::{SessionId, TeardownHandle};

/// A state change posted from outside the session's event path.
pub(crate) type Update = Box<dyn FnOnce() + Send>;

/// Posts updates to one session.
#[derive(Clone)]
pub struct Updater {
    session: SessionId,
    tx: mpsc::UnboundedSender<Update>,
    closed: TeardownHandle,
}

impl Updater {
    pub(crate) fn new(session: SessionId, tx: mpsc::UnboundedSender<Update>, closed: TeardownHandle) -> Self {
        Self { session, tx, closed }
    }

    /// Queue `f` to run in the session. Returns `false` if the session is
    /// gone, in which case `f` is dropped.
    pub fn post<F>(&self, f: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_closed() {
            return false;
        }
        self.tx.send(Box::new(f)).is_ok()
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_requested() || self.tx.is_closed()
    }
}

impl std::fmt::Debug for Updater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Updater")
            .field("session", &self.session)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Lifecycle of a background task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Idle,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// How background work ends early.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("task cancelled")]
    Cancelled,

    #[error("task failed: {0}")]
    Failed(String),
}

/// Handed to the work function.
#[derive(Debug, Clone)]
pub struct TaskContext {
    cancelled: Arc<AtomicBool>,
    updater: Updater,
}

impl TaskContext {
    /// Whether the task was cancelled or its session went away.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire) || self.updater.is_closed()
    }

    /// `Err(TaskError::Cancelled)` once the task should stop.
    pub fn check_cancelled(&self) -> Result<(), TaskError> {
        if self.is_cancelled() {
            Err(TaskError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Queue a state change in the session.
    pub fn post<F>(&self, f: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.updater.post(f)
    }
}

struct TaskShared {
    state: Mutex<TaskState>,
    failure: Mutex<Option<String>>,
    cancelled: Arc<AtomicBool>,
}

impl TaskShared {
    fn finish(&self, outcome: TaskState) {
        let mut state = self.state.lock();
        if *state == TaskState::Running {
            *state = outcome;
        }
    }
}

/// Handle to work running on the blocking pool.
pub struct BackgroundTask {
    shared: Arc<TaskShared>,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundTask {
    /// Start `work` on tokio's blocking pool.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<F>(updater: Updater, work: F) -> Self
    where
        F: FnOnce(&TaskContext) -> Result<(), TaskError> + Send + 'static,
    {
        let cancelled = Arc::new(AtomicBool::new(false));
        let shared = Arc::new(TaskShared {
            state: Mutex::new(TaskState::Running),
            failure: Mutex::new(None),
            cancelled: Arc::clone(&cancelled),
        });
        let session = updater.session();
        let ctx = TaskContext { cancelled, updater };

        let worker = Arc::clone(&shared);
        let handle = tokio::task::spawn_blocking(move || {
            let outcome = work(&ctx);
            match outcome {
                Ok(()) if ctx.is_cancelled() => worker.finish(TaskState::Cancelled),
                Ok(()) => worker.finish(TaskState::Completed),
                Err(TaskError::Cancelled) => worker.finish(TaskState::Cancelled),
                Err(TaskError::Failed(reason)) => {
                    error!(session = %session, reason = %reason, "background task failed");
                    *worker.failure.lock() = Some(reason);
                    worker.finish(TaskState::Failed);
                }
            }
            debug!(session = %session, state = ?*worker.state.lock(), "background task finished");
        });

        Self {
            shared,
            handle: Some(handle),
        }
    }

    pub fn state(&self) -> TaskState {
        *self.shared.state.lock()
    }

    pub fn is_running(&self) -> bool {
        self.state() == TaskState::Running
    }

    /// Ask the work to stop. The state becomes `Cancelled` right away; the
    /// work itself stops at its next `check_cancelled`.
    pub fn cancel(&self) {
        let mut state = self.shared.state.lock();
        if *state == TaskState::Running {
            self.shared.cancelled.store(true, Ordering::Release);
            *state = TaskState::Cancelled;
        }
    }

    /// The failure reason, once the task has failed.
    pub fn failure(&self) -> Option<String> {
        self.shared.failure.lock().clone()
    }

    /// Wait for the work to return.
    pub async fn join(mut self) -> TaskState {
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                error!(error = %err, "background task panicked");
                *self.shared.failure.lock() = Some(err.to_string());
                self.shared.finish(TaskState::Failed);
            }
        }
        self.state()
    }
}

impl std::fmt::Debug for BackgroundTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundTask").field("state", &self.state()).finish()
    }
}
