//! Revision-based pull/merge and push of local writes.
//!
//! A cycle is:
//!
//! 1. `list_threads()` on the remote
//! 2. for each thread whose remote metadata revision is ahead, fetch and
//!    merge field by field ([`ThreadMetadata::merge_into`])
//! 3. for each thread whose remote message cursor is ahead, fetch and upsert
//!    by id, skipping messages whose revision is not newer than the local copy
//! 4. upload local-origin writes the remote has not seen
//!
//! Each thread is read, merged and written back while holding its entry in
//! the shared [`ThreadLocks`].
//!
//! Writes applied from the remote are tagged [`WriteOrigin::Remote`] and
//! recorded in the push ledger, so step 4 never echoes them back.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use cinder_core::{MessageId, Thread, ThreadId, WriteOrigin};
use cinder_store::{MessageVault, StoreError, ThreadStore};

use crate::error::Result;
use crate::locks::ThreadLocks;
use crate::messages::{RemoteMessage, ThreadMetadata, ThreadSummary};
use crate::remote::RemoteApi;

const EVENT_CAPACITY: usize = 256;

/// Notifications for whoever maintains the conversation projection.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// Remote metadata or messages were merged into a known thread.
    ThreadMerged {
        thread: Thread,
        adopted: Vec<&'static str>,
        ties: Vec<&'static str>,
    },
    /// A thread first seen on the remote was created locally.
    ThreadDiscovered { thread: Thread },
    /// Remote messages were written to the vault.
    MessagesApplied { thread_id: ThreadId, count: usize },
    /// A background cycle failed; the worker will back off.
    CycleFailed { error: String },
}

/// Outcome of one pull pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub threads_checked: usize,
    pub threads_merged: usize,
    pub threads_discovered: usize,
    pub messages_applied: usize,
    pub messages_skipped: usize,
    pub ties: usize,
}

/// Outcome of one push pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushReport {
    pub metadata_uploaded: usize,
    pub messages_uploaded: usize,
    pub skipped_remote: usize,
}

/// Revisions known to be on the remote.
#[derive(Default)]
struct PushLedger {
    metadata: HashMap<ThreadId, u64>,
    messages: HashMap<MessageId, u64>,
}

/// Reconciles local stores with a remote.
pub struct Reconciler {
    remote: Arc<dyn RemoteApi>,
    threads: Arc<dyn ThreadStore>,
    vault: Arc<dyn MessageVault>,
    events: broadcast::Sender<SyncEvent>,
    pushed: Mutex<PushLedger>,
    locks: ThreadLocks,
}

impl Reconciler {
    pub fn new(
        remote: Arc<dyn RemoteApi>,
        threads: Arc<dyn ThreadStore>,
        vault: Arc<dyn MessageVault>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            remote,
            threads,
            vault,
            events,
            pushed: Mutex::new(PushLedger::default()),
            locks: ThreadLocks::new(),
        }
    }

    /// Share thread locks with whoever else writes the thread store.
    pub fn with_locks(mut self, locks: ThreadLocks) -> Self {
        self.locks = locks;
        self
    }

    pub fn locks(&self) -> &ThreadLocks {
        &self.locks
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn remote(&self) -> &Arc<dyn RemoteApi> {
        &self.remote
    }

    pub(crate) fn emit(&self, event: SyncEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Pull then push.
    pub async fn run_cycle(&self) -> Result<(ReconcileReport, PushReport)> {
        let pulled = self.reconcile_once().await?;
        let pushed = self.push_local().await?;
        Ok((pulled, pushed))
    }

    /// Pull every thread the remote is ahead on.
    pub async fn reconcile_once(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        let summaries = self.remote.list_threads().await?;

        for summary in summaries {
            report.threads_checked += 1;
            let _guard = self.locks.lock(&summary.thread_id).await;
            match self.threads.get_thread(&summary.thread_id).await? {
                Some(local) => self.reconcile_thread(local, &summary, &mut report).await?,
                None => self.discover(&summary, &mut report).await?,
            }
        }

        if report.threads_merged + report.threads_discovered > 0 {
            info!(
                merged = report.threads_merged,
                discovered = report.threads_discovered,
                messages = report.messages_applied,
                "reconciled with remote"
            );
        }
        Ok(report)
    }

    async fn reconcile_thread(
        &self,
        mut thread: Thread,
        summary: &ThreadSummary,
        report: &mut ReconcileReport,
    ) -> Result<()> {
        let id = thread.thread_id.clone();
        let was_terminal = thread.is_terminal();
        let mut dirty = false;
        let mut adopted = Vec::new();
        let mut ties = Vec::new();

        if summary.metadata_revision > thread.metadata_revision {
            if let Some(meta) = self
                .remote
                .fetch_metadata(&id, thread.metadata_revision)
                .await?
            {
                let merge = meta.merge_into(&mut thread);
                report.ties += merge.ties.len();
                self.pushed
                    .lock()
                    .await
                    .metadata
                    .insert(id.clone(), thread.metadata_revision);
                adopted = merge.adopted;
                ties = merge.ties;
                dirty = true;
            }
        }

        if !thread.is_terminal() && summary.message_revision > thread.message_revision {
            let cursor = self.apply_messages(&id, thread.message_revision, report).await?;
            thread.message_revision = thread.message_revision.max(cursor);
            dirty = true;
        }

        if thread.is_terminal() && !was_terminal {
            let purged = self.vault.purge_thread(&id).await?;
            info!(thread_id = %id, status = thread.status.as_str(), purged, "remote ended thread");
        }

        if dirty {
            self.threads.put_thread(&thread).await?;
            report.threads_merged += 1;
            self.emit(SyncEvent::ThreadMerged {
                thread,
                adopted,
                ties,
            });
        }
        Ok(())
    }

    async fn discover(&self, summary: &ThreadSummary, report: &mut ReconcileReport) -> Result<()> {
        let Some(meta) = self.remote.fetch_metadata(&summary.thread_id, 0).await? else {
            return Ok(());
        };
        let mut thread = meta.to_thread();
        if thread.is_terminal() {
            debug!(thread_id = %thread.thread_id, "skipping ended remote thread");
            return Ok(());
        }

        self.pushed
            .lock()
            .await
            .metadata
            .insert(thread.thread_id.clone(), thread.metadata_revision);

        let cursor = self.apply_messages(&thread.thread_id, 0, report).await?;
        thread.message_revision = cursor;
        self.threads.put_thread(&thread).await?;
        report.threads_discovered += 1;
        self.emit(SyncEvent::ThreadDiscovered { thread });
        Ok(())
    }

    /// Upsert remote messages. Returns the highest cursor seen.
    async fn apply_messages(
        &self,
        thread_id: &ThreadId,
        since: u64,
        report: &mut ReconcileReport,
    ) -> Result<u64> {
        let messages = self.remote.fetch_messages(thread_id, since).await?;
        let mut cursor = since;
        let mut applied = 0;

        for remote in messages {
            cursor = cursor.max(remote.cursor);
            if &remote.thread_id != thread_id {
                warn!(thread_id = %thread_id, message_id = %remote.id, "remote message for another thread");
                report.messages_skipped += 1;
                continue;
            }
            if let Some(local) = self.vault.get(&remote.id).await? {
                if local.revision >= remote.revision {
                    report.messages_skipped += 1;
                    continue;
                }
            }
            match self.vault.save(thread_id, remote.to_draft()).await {
                Ok(_) => {
                    applied += 1;
                    self.pushed
                        .lock()
                        .await
                        .messages
                        .insert(remote.id.clone(), remote.revision);
                }
                Err(StoreError::Conflict(reason)) => {
                    warn!(thread_id = %thread_id, %reason, "skipping conflicting remote message");
                    report.messages_skipped += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }

        if applied > 0 {
            report.messages_applied += applied;
            self.emit(SyncEvent::MessagesApplied {
                thread_id: thread_id.clone(),
                count: applied,
            });
        }
        Ok(cursor)
    }

    /// Upload local writes the remote has not seen.
    pub async fn push_local(&self) -> Result<PushReport> {
        let mut report = PushReport::default();

        for thread in self.threads.list_threads().await? {
            let id = thread.thread_id.clone();
            let known = self.pushed.lock().await.metadata.get(&id).copied();
            if thread.metadata_revision > 0 && known.map_or(true, |r| thread.metadata_revision > r) {
                self.remote
                    .upload_metadata(&id, &ThreadMetadata::from_thread(&thread))
                    .await?;
                self.pushed
                    .lock()
                    .await
                    .metadata
                    .insert(id.clone(), thread.metadata_revision);
                report.metadata_uploaded += 1;
            }

            if thread.is_terminal() {
                continue;
            }

            for message in self.vault.list_by_thread(&id).await? {
                if message.origin == WriteOrigin::Remote {
                    report.skipped_remote += 1;
                    continue;
                }
                let seen = self.pushed.lock().await.messages.get(&message.id).copied();
                if seen.is_some_and(|r| r >= message.revision) {
                    continue;
                }
                self.remote
                    .upload_message(&id, &RemoteMessage::from_message(&message))
                    .await?;
                self.pushed
                    .lock()
                    .await
                    .messages
                    .insert(message.id.clone(), message.revision);
                report.messages_uploaded += 1;
            }
        }

        if report.metadata_uploaded + report.messages_uploaded > 0 {
            debug!(
                metadata = report.metadata_uploaded,
                messages = report.messages_uploaded,
                "pushed local writes"
            );
        }
        Ok(report)
    }

    /// Drop a thread from the remote and the push ledger.
    pub async fn purge_remote(&self, thread_id: &ThreadId) -> Result<()> {
        {
            let mut pushed = self.pushed.lock().await;
            pushed.metadata.remove(thread_id);
        }
        self.remote.purge_thread(thread_id).await
    }
}
