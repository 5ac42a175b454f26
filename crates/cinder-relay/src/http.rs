//! HTTP helper cache backend.
//!
//! Every request runs on the fixed retry schedule from [`RetryPolicy`]:
//! transport errors and statuses in [`RETRYABLE_STATUSES`] are retried, any
//! other 4xx fails immediately, and a 404 on `GET`/`DELETE` is an answer,
//! not an error.
//!
//! [`RETRYABLE_STATUSES`]: crate::config::RETRYABLE_STATUSES

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::backend::{CacheBackend, CacheEntry, CacheQuota, CacheStatus, PruneResult};
use crate::config::{RelayConfig, RetryPolicy};
use crate::error::{RelayError, Result};

/// Helper cache reached over HTTP(S).
pub struct HttpCacheBackend {
    client: reqwest::Client,
    config: RelayConfig,
}

enum Reply {
    Body(Vec<u8>),
    NotFound,
}

impl HttpCacheBackend {
    pub fn new(config: RelayConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    fn cache_url(&self, id: &str) -> String {
        self.url(&format!("/cache/{}", id))
    }

    /// Send with bounded retry.
    async fn send(&self, method: Method, url: &str, body: Option<&CacheEntry>) -> Result<Reply> {
        let policy = &self.config.retry;
        let mut last = String::new();

        for attempt in 0..policy.attempts {
            if attempt > 0 {
                tokio::time::sleep(policy.delay_after(attempt - 1)).await;
            }

            let mut request = self.client.request(method.clone(), url);
            if let Some(entry) = body {
                request = request.json(entry);
            }

            let response = match request.send().await {
                Ok(r) => r,
                Err(e) => {
                    debug!(url, attempt, error = %e, "helper cache request failed");
                    last = e.to_string();
                    continue;
                }
            };

            let status = response.status();
            if status.is_success() {
                return Ok(Reply::Body(response.bytes().await?.to_vec()));
            }
            if status == StatusCode::NOT_FOUND {
                return Ok(Reply::NotFound);
            }
            if RetryPolicy::is_retryable(status.as_u16()) {
                debug!(url, attempt, status = status.as_u16(), "retryable helper cache status");
                last = format!("status {}", status.as_u16());
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::Status {
                status: status.as_u16(),
                body,
            });
        }

        warn!(url, attempts = policy.attempts, "helper cache retries exhausted");
        Err(RelayError::RetriesExhausted {
            attempts: policy.attempts,
            last,
        })
    }

    async fn get_json<T: DeserializeOwned + Default>(&self, path: &str) -> Result<T> {
        match self.send(Method::GET, &self.url(path), None).await? {
            Reply::Body(bytes) if bytes.is_empty() => Ok(T::default()),
            Reply::Body(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Reply::NotFound => Err(RelayError::Status {
                status: 404,
                body: format!("{} not found", path),
            }),
        }
    }
}

#[async_trait]
impl CacheBackend for HttpCacheBackend {
    async fn put(&self, entry: &CacheEntry) -> Result<()> {
        match self.send(Method::PUT, &self.cache_url(&entry.id), Some(entry)).await? {
            Reply::Body(_) => Ok(()),
            Reply::NotFound => Err(RelayError::Status {
                status: 404,
                body: "cache endpoint not found".into(),
            }),
        }
    }

    async fn get(&self, id: &str) -> Result<Option<CacheEntry>> {
        match self.send(Method::GET, &self.cache_url(id), None).await? {
            Reply::Body(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Reply::NotFound => Ok(None),
        }
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        match self.send(Method::DELETE, &self.cache_url(id), None).await? {
            Reply::Body(_) => Ok(true),
            Reply::NotFound => Ok(false),
        }
    }

    async fn prune(&self) -> Result<PruneResult> {
        match self.send(Method::POST, &self.url("/cache/prune"), None).await? {
            Reply::Body(bytes) if bytes.is_empty() => Ok(PruneResult::default()),
            Reply::Body(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Reply::NotFound => Ok(PruneResult::default()),
        }
    }

    async fn status(&self) -> Result<CacheStatus> {
        self.get_json("/status").await
    }

    async fn quota(&self) -> Result<CacheQuota> {
        self.get_json("/quota").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one scripted response per connection and record request lines.
    async fn serve(script: Vec<(u16, &'static str)>) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();

        tokio::spawn(async move {
            for (status, body) in script {
                let (mut sock, _) = listener.accept().await.unwrap();
                let mut buf = vec![0u8; 16 * 1024];
                let mut read = 0;
                loop {
                    let n = sock.read(&mut buf[read..]).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    read += n;
                    let text = String::from_utf8_lossy(&buf[..read]).to_string();
                    if let Some(end) = text.find("\r\n\r\n") {
                        let len = text[..end]
                            .lines()
                            .find_map(|l| {
                                let l = l.to_ascii_lowercase();
                                l.strip_prefix("content-length:")
                                    .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                            })
                            .unwrap_or(0);
                        if read >= end + 4 + len {
                            break;
                        }
                    }
                }
                let text = String::from_utf8_lossy(&buf[..read]).to_string();
                log.lock()
                    .unwrap()
                    .push(text.lines().next().unwrap_or_default().to_string());

                let response = format!(
                    "HTTP/1.1 {} Scripted\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                sock.write_all(response.as_bytes()).await.unwrap();
                let _ = sock.shutdown().await;
            }
        });

        (format!("http://{}", addr), seen)
    }

    fn backend(base: &str) -> HttpCacheBackend {
        let config = RelayConfig::new(base)
            .with_retry(RetryPolicy::fixed(3, Duration::from_millis(5)))
            .with_request_timeout(Duration::from_secs(5));
        HttpCacheBackend::new(config).unwrap()
    }

    #[tokio::test]
    async fn test_get_retries_then_succeeds() {
        let (base, seen) = serve(vec![
            (503, ""),
            (429, ""),
            (200, r#"{"id":"abc:0","payload":{"v":1}}"#),
        ])
        .await;

        let entry = backend(&base).get("abc:0").await.unwrap().unwrap();
        assert_eq!(entry.id, "abc:0");
        assert_eq!(entry.payload["v"], 1);
        assert_eq!(seen.lock().unwrap().len(), 3);
        assert!(seen.lock().unwrap()[0].starts_with("GET /cache/abc:0"));
    }

    #[tokio::test]
    async fn test_get_404_is_none() {
        let (base, seen) = serve(vec![(404, "")]).await;
        assert!(backend(&base).get("missing:0").await.unwrap().is_none());
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_non_retryable_4xx_fails_once() {
        let (base, seen) = serve(vec![(400, "bad id")]).await;
        let err = backend(&base).get("x").await.unwrap_err();
        assert!(matches!(err, RelayError::Status { status: 400, .. }));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_retries_exhausted_after_three() {
        let (base, seen) = serve(vec![(500, ""), (502, ""), (504, "")]).await;
        let err = backend(&base).delete("x:1").await.unwrap_err();
        assert!(matches!(err, RelayError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(seen.lock().unwrap().len(), 3);
        assert!(seen.lock().unwrap()[2].starts_with("DELETE /cache/x:1"));
    }

    #[tokio::test]
    async fn test_put_and_status_endpoints() {
        let (base, seen) = serve(vec![
            (200, "{}"),
            (200, r#"{"ok":true,"entries":4}"#),
            (200, r#"{"used_bytes":10,"limit_bytes":100}"#),
            (200, r#"{"removed":2}"#),
        ])
        .await;
        let backend = backend(&base);

        backend
            .put(&CacheEntry {
                id: "t:0".into(),
                payload: serde_json::json!({"a": 1}),
            })
            .await
            .unwrap();
        let status = backend.status().await.unwrap();
        assert!(status.ok);
        assert_eq!(status.entries, Some(4));
        assert_eq!(backend.quota().await.unwrap().limit_bytes, 100);
        assert_eq!(backend.prune().await.unwrap().removed, 2);

        let seen = seen.lock().unwrap();
        assert!(seen[0].starts_with("PUT /cache/t:0"));
        assert!(seen[1].starts_with("GET /status"));
        assert!(seen[2].starts_with("GET /quota"));
        assert!(seen[3].starts_with("POST /cache/prune"));
    }
}
