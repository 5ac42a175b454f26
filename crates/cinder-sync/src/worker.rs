//! Background reconciliation loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::backoff::Backoff;
use crate::reconciler::{Reconciler, SyncEvent};

/// Scheduling for the background loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileConfig {
    /// Delay between successful cycles.
    pub interval: Duration,
    /// Upper bound for the failure backoff.
    pub max_backoff: Duration,
}

impl ReconcileConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff;
        self
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            max_backoff: Duration::from_secs(5 * 60),
        }
    }
}

/// Handle to the running reconcile loop.
///
/// The loop runs one cycle immediately, then sleeps for the backoff delay.
/// [`shutdown`](Self::shutdown) cancels both the pending sleep and any
/// in-flight cycle.
pub struct ReconcileWorker {
    shutdown: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ReconcileWorker {
    pub fn spawn(reconciler: Arc<Reconciler>, config: ReconcileConfig) -> Self {
        let (shutdown, mut stop) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut backoff = Backoff::new(config.interval, config.max_backoff);
            let mut delay = Duration::ZERO;

            loop {
                tokio::select! {
                    _ = stop.changed() => break,
                    _ = tokio::time::sleep(delay) => {}
                }

                let result = tokio::select! {
                    _ = stop.changed() => break,
                    r = reconciler.run_cycle() => r,
                };

                delay = match result {
                    Ok(_) => backoff.succeed(),
                    Err(e) => {
                        let next = backoff.fail();
                        warn!(
                            error = %e,
                            failures = backoff.failures(),
                            retry_in_ms = next.as_millis() as u64,
                            "reconcile cycle failed"
                        );
                        reconciler.emit(SyncEvent::CycleFailed {
                            error: e.to_string(),
                        });
                        next
                    }
                };
            }
            debug!("reconcile worker stopped");
        });

        Self {
            shutdown,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Stop the loop and wait for it to exit.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.handle.lock().await.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "reconcile worker ended abnormally");
            }
        }
    }

    pub async fn is_running(&self) -> bool {
        self.handle
            .lock()
            .await
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryRemote;
    use cinder_store::MemoryStore;

    fn reconciler(remote: &Arc<MemoryRemote>) -> Arc<Reconciler> {
        let store = Arc::new(MemoryStore::new());
        Arc::new(Reconciler::new(remote.clone(), store.clone(), store))
    }

    #[tokio::test]
    async fn test_worker_reports_failures_and_stops() {
        let remote = MemoryRemote::new();
        remote.set_offline(true);
        let sync = reconciler(&remote);
        let mut events = sync.subscribe();

        let worker = ReconcileWorker::spawn(
            sync,
            ReconcileConfig::default()
                .with_interval(Duration::from_millis(5))
                .with_max_backoff(Duration::from_millis(20)),
        );

        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, SyncEvent::CycleFailed { .. }));
        assert!(worker.is_running().await);

        worker.shutdown().await;
        assert!(!worker.is_running().await);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_long_sleep() {
        let remote = MemoryRemote::new();
        let worker = ReconcileWorker::spawn(
            reconciler(&remote),
            ReconcileConfig::default().with_interval(Duration::from_secs(3600)),
        );
        tokio::time::timeout(Duration::from_secs(5), worker.shutdown())
            .await
            .unwrap();
        assert!(!worker.is_running().await);
    }
}
