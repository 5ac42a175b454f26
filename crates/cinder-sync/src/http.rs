//! HTTP client for the remote messaging API.
//!
//! ```text
//! GET    /threads
//! GET    /threads/{id}/metadata?revisionSince={n}
//! GET    /threads/{id}/messages?sinceRevision={n}
//! PUT    /threads/{id}/metadata
//! POST   /threads/{id}/messages        -> {"cursor": n}
//! DELETE /threads/{id}
//! ```
//!
//! No retries here; the reconcile worker backs off as a whole.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use tracing::debug;

use cinder_core::ThreadId;

use crate::error::{Result, SyncError};
use crate::messages::{RemoteMessage, ThreadMetadata, ThreadSummary};
use crate::remote::RemoteApi;

#[derive(Deserialize)]
struct CursorReply {
    cursor: u64,
}

/// Remote messaging API over HTTP(S).
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRemote {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn thread_url(&self, thread_id: &ThreadId, tail: &str) -> String {
        format!("{}/threads/{}{}", self.base_url, thread_id, tail)
    }

    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(SyncError::Remote {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl RemoteApi for HttpRemote {
    async fn list_threads(&self) -> Result<Vec<ThreadSummary>> {
        let response = self
            .client
            .get(format!("{}/threads", self.base_url))
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn fetch_metadata(
        &self,
        thread_id: &ThreadId,
        revision_since: u64,
    ) -> Result<Option<ThreadMetadata>> {
        let url = self.thread_url(thread_id, &format!("/metadata?revisionSince={}", revision_since));
        let response = self.client.get(&url).send().await?;
        if matches!(response.status(), StatusCode::NOT_FOUND | StatusCode::NO_CONTENT) {
            debug!(thread_id = %thread_id, "no newer remote metadata");
            return Ok(None);
        }
        Ok(Some(Self::check(response).await?.json().await?))
    }

    async fn fetch_messages(
        &self,
        thread_id: &ThreadId,
        since_revision: u64,
    ) -> Result<Vec<RemoteMessage>> {
        let url = self.thread_url(thread_id, &format!("/messages?sinceRevision={}", since_revision));
        let response = self.client.get(&url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        Ok(Self::check(response).await?.json().await?)
    }

    async fn upload_metadata(&self, thread_id: &ThreadId, metadata: &ThreadMetadata) -> Result<()> {
        let response = self
            .client
            .put(self.thread_url(thread_id, "/metadata"))
            .json(metadata)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn upload_message(&self, thread_id: &ThreadId, message: &RemoteMessage) -> Result<u64> {
        let response = self
            .client
            .post(self.thread_url(thread_id, "/messages"))
            .json(message)
            .send()
            .await?;
        let reply: CursorReply = Self::check(response).await?.json().await?;
        Ok(reply.cursor)
    }

    async fn purge_thread(&self, thread_id: &ThreadId) -> Result<()> {
        let response = self
            .client
            .delete(self.thread_url(thread_id, ""))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::check(response).await?;
        Ok(())
    }
}
