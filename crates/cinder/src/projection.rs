//! The externally visible list of conversations.
//!
//! Readers either poll [`Projection::list`] or wait on the revision counter
//! returned by [`Projection::watch`], which ticks after every change.

use std::collections::BTreeMap;

use serde::Serialize;
use tokio::sync::{watch, RwLock};

use cinder_core::{IdentityKind, PublicKey, Thread, ThreadId, ThreadStatus};

/// One conversation as a UI would render it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationView {
    pub thread_id: ThreadId,
    pub status: ThreadStatus,
    pub identity_kind: IdentityKind,
    pub peer: Option<PublicKey>,
    pub peer_label: Option<String>,
    pub can_send: bool,
    pub last_activity: i64,
}

impl ConversationView {
    pub fn from_thread(thread: &Thread) -> Self {
        Self {
            thread_id: thread.thread_id.clone(),
            status: thread.status,
            identity_kind: thread.identity_kind,
            peer: thread.peer_key,
            peer_label: thread.peer_label.clone(),
            can_send: thread.can_send(),
            last_activity: thread.updated_at,
        }
    }
}

pub struct Projection {
    views: RwLock<BTreeMap<ThreadId, ConversationView>>,
    revision: watch::Sender<u64>,
}

impl Default for Projection {
    fn default() -> Self {
        Self::new()
    }
}

impl Projection {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            views: RwLock::new(BTreeMap::new()),
            revision,
        }
    }

    fn tick(&self) {
        self.revision.send_modify(|r| *r += 1);
    }

    /// Insert or refresh the view of a thread. Ticks only on change.
    pub async fn upsert(&self, thread: &Thread) {
        let view = ConversationView::from_thread(thread);
        let mut views = self.views.write().await;
        let changed = views.get(&view.thread_id) != Some(&view);
        if changed {
            views.insert(view.thread_id.clone(), view);
            drop(views);
            self.tick();
        }
    }

    pub async fn remove(&self, thread_id: &ThreadId) -> bool {
        let removed = self.views.write().await.remove(thread_id).is_some();
        if removed {
            self.tick();
        }
        removed
    }

    /// Record activity (a message) without a metadata change.
    pub async fn touch(&self, thread_id: &ThreadId, at: i64) {
        let mut views = self.views.write().await;
        if let Some(view) = views.get_mut(thread_id) {
            if at > view.last_activity {
                view.last_activity = at;
                drop(views);
                self.tick();
            }
        }
    }

    pub async fn get(&self, thread_id: &ThreadId) -> Option<ConversationView> {
        self.views.read().await.get(thread_id).cloned()
    }

    /// Every conversation, most recent activity first.
    pub async fn list(&self) -> Vec<ConversationView> {
        let mut out: Vec<_> = self.views.read().await.values().cloned().collect();
        out.sort_by(|a, b| {
            b.last_activity
                .cmp(&a.last_activity)
                .then_with(|| a.thread_id.cmp(&b.thread_id))
        });
        out
    }

    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }
}
