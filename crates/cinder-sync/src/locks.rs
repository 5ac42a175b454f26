//! Per-thread locks shared between the reconciler and the engine that owns
//! the thread records.
//!
//! Every read-modify-write of a thread record happens under its lock, so a
//! merge never starts from a copy that a local transition has since
//! replaced.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use cinder_core::ThreadId;

/// Cloneable handle to one set of per-thread locks.
#[derive(Clone, Default)]
pub struct ThreadLocks {
    inner: Arc<Mutex<HashMap<ThreadId, Arc<Mutex<()>>>>>,
}

impl ThreadLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `thread_id`.
    pub async fn lock(&self, thread_id: &ThreadId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.inner.lock().await;
            Arc::clone(locks.entry(thread_id.clone()).or_default())
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_clones_share_locks() {
        let a = ThreadLocks::new();
        let b = a.clone();
        let id = ThreadId::new("t1").unwrap();

        let guard = a.lock(&id).await;
        let waiting = tokio::spawn({
            let id = id.clone();
            async move {
                let _guard = b.lock(&id).await;
            }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiting.is_finished());

        drop(guard);
        waiting.await.unwrap();
    }

    #[tokio::test]
    async fn test_threads_do_not_block_each_other() {
        let locks = ThreadLocks::new();
        let _a = locks.lock(&ThreadId::new("a").unwrap()).await;
        let _b = locks.lock(&ThreadId::new("b").unwrap()).await;
    }
}
