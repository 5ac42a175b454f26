//! Engine configuration.

use cinder_relay::RelayConfig;
use cinder_sync::ReconcileConfig;

/// Bounds for best-effort background work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskQueueConfig {
    /// Tasks allowed to run at once.
    pub max_concurrency: usize,
    /// Failures buffered on the error channel before new ones are dropped.
    pub error_capacity: usize,
}

impl Default for TaskQueueConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            error_capacity: 64,
        }
    }
}

/// Configuration for the thread engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub relay: RelayConfig,
    pub reconcile: ReconcileConfig,
    pub tasks: TaskQueueConfig,
    /// Also drop sealed messages in the helper cache for an offline peer.
    pub relay_pending_on_send: bool,
    /// Check the control token on the ledger before each send.
    pub verify_on_send: bool,
    /// Run the reconcile loop in the background after `init`.
    pub background_reconcile: bool,
}

impl EngineConfig {
    pub fn with_relay(mut self, relay: RelayConfig) -> Self {
        self.relay = relay;
        self
    }

    pub fn with_reconcile(mut self, reconcile: ReconcileConfig) -> Self {
        self.reconcile = reconcile;
        self
    }

    pub fn with_tasks(mut self, tasks: TaskQueueConfig) -> Self {
        self.tasks = tasks;
        self
    }

    pub fn with_relay_pending_on_send(mut self, enabled: bool) -> Self {
        self.relay_pending_on_send = enabled;
        self
    }

    pub fn with_verify_on_send(mut self, enabled: bool) -> Self {
        self.verify_on_send = enabled;
        self
    }

    pub fn with_background_reconcile(mut self, enabled: bool) -> Self {
        self.background_reconcile = enabled;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            relay: RelayConfig::default(),
            reconcile: ReconcileConfig::default(),
            tasks: TaskQueueConfig::default(),
            relay_pending_on_send: true,
            verify_on_send: true,
            background_reconcile: true,
        }
    }
}
