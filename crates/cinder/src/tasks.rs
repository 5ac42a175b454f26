//! Bounded queue for best-effort background work.
//!
//! Relay writes, cache enrollment and remote purges must not hold up the
//! operation that triggered them, and must not fail it either. They run here
//! with bounded concurrency; failures are logged and buffered on an error
//! channel that callers can drain.
//!
//! Work tied to a control token is queued behind a fence named after it.
//! [`TaskQueue::revoke`] waits for fenced work already writing, and every
//! fenced task that starts afterwards is skipped.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, RwLock, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, warn};

use cinder_core::ErrorKind;

use crate::config::TaskQueueConfig;
use crate::error::{EngineError, Result};

/// A background task that failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskError {
    pub label: String,
    pub kind: ErrorKind,
    pub message: String,
}

/// Gate for the work of one control token. `true` once revoked.
type Fence = Arc<RwLock<bool>>;

pub struct TaskQueue {
    permits: Arc<Semaphore>,
    fences: Mutex<HashMap<String, Fence>>,
    errors_tx: mpsc::Sender<TaskError>,
    errors_rx: Mutex<mpsc::Receiver<TaskError>>,
    tasks: Mutex<JoinSet<()>>,
    closed: AtomicBool,
}

impl TaskQueue {
    pub fn new(config: &TaskQueueConfig) -> Self {
        let (errors_tx, errors_rx) = mpsc::channel(config.error_capacity.max(1));
        Self {
            permits: Arc::new(Semaphore::new(config.max_concurrency.max(1))),
            fences: Mutex::new(HashMap::new()),
            errors_tx,
            errors_rx: Mutex::new(errors_rx),
            tasks: Mutex::new(JoinSet::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Queue a task. Fails only once the queue has shut down.
    pub async fn spawn<F>(&self, label: impl Into<String>, task: F) -> Result<()>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.enqueue(label.into(), None, task).await
    }

    /// Queue a task behind the fence `key`. The task is dropped unpolled if
    /// the fence has been revoked by the time it gets a permit.
    pub async fn spawn_fenced<F>(&self, key: &str, label: impl Into<String>, task: F) -> Result<()>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let fence = self.fence(key).await;
        self.enqueue(label.into(), Some(fence), task).await
    }

    /// Close the fence `key`. Returns once fenced work that already started
    /// has finished; fenced work that has not started never will.
    pub async fn revoke(&self, key: &str) {
        let fence = self.fence(key).await;
        let mut revoked = fence.write().await;
        if !*revoked {
            *revoked = true;
            debug!(fence = key, "revoked fenced work");
        }
    }

    /// Whether the fence `key` has been revoked.
    pub async fn is_revoked(&self, key: &str) -> bool {
        let fence = self.fences.lock().await.get(key).cloned();
        match fence {
            Some(fence) => *fence.read().await,
            None => false,
        }
    }

    async fn fence(&self, key: &str) -> Fence {
        let mut fences = self.fences.lock().await;
        Arc::clone(fences.entry(key.to_string()).or_default())
    }

    async fn enqueue<F>(&self, label: String, fence: Option<Fence>, task: F) -> Result<()>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineError::Stopped);
        }
        let permits = Arc::clone(&self.permits);
        let errors = self.errors_tx.clone();

        let mut tasks = self.tasks.lock().await;
        while let Some(joined) = tasks.try_join_next() {
            log_join(joined);
        }
        tasks.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            let _gate = match &fence {
                Some(fence) => {
                    let gate = fence.read().await;
                    if *gate {
                        debug!(task = %label, "fence revoked, skipping");
                        return;
                    }
                    Some(gate)
                }
                None => None,
            };
            if let Err(e) = task.await {
                warn!(task = %label, error = %e, "background task failed");
                let failure = TaskError {
                    label,
                    kind: e.kind(),
                    message: e.to_string(),
                };
                if errors.try_send(failure).is_err() {
                    debug!("task error channel full, dropping failure");
                }
            }
        });
        Ok(())
    }

    /// Failures reported since the last call.
    pub async fn take_errors(&self) -> Vec<TaskError> {
        let mut rx = self.errors_rx.lock().await;
        let mut out = Vec::new();
        while let Ok(e) = rx.try_recv() {
            out.push(e);
        }
        out
    }

    /// Wait until every queued task has finished.
    pub async fn drain(&self) {
        loop {
            let mut set = std::mem::take(&mut *self.tasks.lock().await);
            if set.is_empty() {
                return;
            }
            while let Some(joined) = set.join_next().await {
                log_join(joined);
            }
        }
    }

    /// Refuse new work and abort whatever is still running.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.permits.close();
        self.tasks.lock().await.abort_all();
    }
}

fn log_join(joined: std::result::Result<(), JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            warn!(error = %e, "background task panicked");
        }
    }
}
