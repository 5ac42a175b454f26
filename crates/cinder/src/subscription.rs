//! Per-thread subscriptions over an opaque publish/subscribe channel.
//!
//! The channel moves bytes on string topics and knows nothing about
//! threads. [`SubscriptionManager`] owns one forwarder task per subscribed
//! thread; each forwarder decodes [`Frame`]s, drops anything malformed or
//! addressed to another thread, and hands the rest to the engine's
//! dispatcher queue.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use cinder_core::ThreadId;

use crate::error::{EngineError, Result};
use crate::event::Frame;

/// Buffered frames per subscription.
const TOPIC_CAPACITY: usize = 256;

/// Real-time event transport.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait EventChannel: Send + Sync {
    /// Deliver `payload` to every subscriber of `topic`.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> anyhow::Result<()>;

    /// Start receiving `topic`. A second call replaces the first receiver.
    async fn subscribe(&self, topic: &str) -> anyhow::Result<mpsc::Receiver<Vec<u8>>>;

    async fn unsubscribe(&self, topic: &str) -> anyhow::Result<()>;
}

/// In-memory bus shared by several parties.
#[derive(Default)]
pub struct MemoryEventHub {
    topics: RwLock<HashMap<String, HashMap<u64, mpsc::Sender<Vec<u8>>>>>,
    next_client: AtomicU64,
    offline: AtomicBool,
}

impl MemoryEventHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A channel handle for one party.
    pub fn connect(self: &Arc<Self>) -> MemoryEventChannel {
        MemoryEventChannel {
            client: self.next_client.fetch_add(1, Ordering::SeqCst),
            hub: Arc::clone(self),
        }
    }

    /// Make every publish fail.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub async fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.read().await.get(topic).map_or(0, HashMap::len)
    }
}

/// One party's connection to a [`MemoryEventHub`].
pub struct MemoryEventChannel {
    client: u64,
    hub: Arc<MemoryEventHub>,
}

#[async_trait]
impl EventChannel for MemoryEventChannel {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> anyhow::Result<()> {
        if self.hub.offline.load(Ordering::SeqCst) {
            anyhow::bail!("event hub offline");
        }
        let senders: Vec<_> = self
            .hub
            .topics
            .read()
            .await
            .get(topic)
            .map(|subs| subs.values().cloned().collect())
            .unwrap_or_default();
        for sender in senders {
            // A closed receiver belongs to a party that went away.
            let _ = sender.send(payload.clone()).await;
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> anyhow::Result<mpsc::Receiver<Vec<u8>>> {
        let (tx, rx) = mpsc::channel(TOPIC_CAPACITY);
        self.hub
            .topics
            .write()
            .await
            .entry(topic.to_string())
            .or_default()
            .insert(self.client, tx);
        Ok(rx)
    }

    async fn unsubscribe(&self, topic: &str) -> anyhow::Result<()> {
        let mut topics = self.hub.topics.write().await;
        if let Some(subs) = topics.get_mut(topic) {
            subs.remove(&self.client);
            if subs.is_empty() {
                topics.remove(topic);
            }
        }
        Ok(())
    }
}

/// Maps threads to channel topics and forwards decoded frames.
pub struct SubscriptionManager {
    channel: Arc<dyn EventChannel>,
    inbound: mpsc::Sender<Frame>,
    forwarders: Mutex<HashMap<ThreadId, JoinHandle<()>>>,
}

impl SubscriptionManager {
    pub fn new(channel: Arc<dyn EventChannel>, inbound: mpsc::Sender<Frame>) -> Self {
        Self {
            channel,
            inbound,
            forwarders: Mutex::new(HashMap::new()),
        }
    }

    pub fn topic(thread_id: &ThreadId) -> String {
        format!("thread/{}", thread_id)
    }

    /// Subscribe to a thread's topic. Idempotent.
    pub async fn subscribe(&self, thread_id: &ThreadId) -> Result<()> {
        let mut forwarders = self.forwarders.lock().await;
        if forwarders.contains_key(thread_id) {
            return Ok(());
        }
        let mut rx = self
            .channel
            .subscribe(&Self::topic(thread_id))
            .await
            .map_err(|e| EngineError::Channel(e.to_string()))?;

        let inbound = self.inbound.clone();
        let expected = thread_id.clone();
        let handle = tokio::spawn(async move {
            while let Some(bytes) = rx.recv().await {
                let frame = match Frame::decode(&bytes) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(thread_id = %expected, error = %e, "dropping malformed frame");
                        continue;
                    }
                };
                if frame.thread_id() != &expected {
                    warn!(
                        thread_id = %expected,
                        addressed = %frame.thread_id(),
                        "dropping frame addressed to another thread"
                    );
                    continue;
                }
                if inbound.send(frame).await.is_err() {
                    break;
                }
            }
            debug!(thread_id = %expected, "forwarder stopped");
        });
        forwarders.insert(thread_id.clone(), handle);
        debug!(thread_id = %thread_id, "subscribed");
        Ok(())
    }

    pub async fn unsubscribe(&self, thread_id: &ThreadId) -> Result<()> {
        if let Some(handle) = self.forwarders.lock().await.remove(thread_id) {
            handle.abort();
        }
        self.channel
            .unsubscribe(&Self::topic(thread_id))
            .await
            .map_err(|e| EngineError::Channel(e.to_string()))
    }

    pub async fn is_subscribed(&self, thread_id: &ThreadId) -> bool {
        self.forwarders.lock().await.contains_key(thread_id)
    }

    pub async fn publish(&self, frame: &Frame) -> Result<()> {
        let bytes = frame.to_bytes()?;
        self.channel
            .publish(&Self::topic(frame.thread_id()), bytes)
            .await
            .map_err(|e| EngineError::Channel(e.to_string()))
    }

    /// Stop every forwarder and drop the channel subscriptions.
    pub async fn shutdown(&self) {
        let drained: Vec<_> = self.forwarders.lock().await.drain().collect();
        for (thread_id, handle) in drained {
            handle.abort();
            if let Err(e) = self.channel.unsubscribe(&Self::topic(&thread_id)).await {
                warn!(thread_id = %thread_id, error = %e, "unsubscribe failed during shutdown");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ControlEnvelope, ControlEvent};
    use cinder_core::PublicKey;
    use std::time::Duration;

    fn tid(s: &str) -> ThreadId {
        ThreadId::new(s).unwrap()
    }

    fn leave(thread: &str) -> Frame {
        Frame::Control(ControlEnvelope {
            thread_id: tid(thread),
            from: PublicKey::from_bytes([1; 32]),
            event: ControlEvent::Leave { at: 5 },
        })
    }

    #[tokio::test]
    async fn test_frames_reach_other_party() {
        let hub = MemoryEventHub::new();
        let (tx, mut rx) = mpsc::channel(8);
        let bob = SubscriptionManager::new(Arc::new(hub.connect()), tx);
        bob.subscribe(&tid("t1")).await.unwrap();

        let (alice_tx, _alice_rx) = mpsc::channel(8);
        let alice = SubscriptionManager::new(Arc::new(hub.connect()), alice_tx);
        alice.publish(&leave("t1")).await.unwrap();

        let got = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, leave("t1"));
    }

    #[tokio::test]
    async fn test_malformed_and_misaddressed_frames_dropped() {
        let hub = MemoryEventHub::new();
        let (tx, mut rx) = mpsc::channel(8);
        let bob = SubscriptionManager::new(Arc::new(hub.connect()), tx);
        bob.subscribe(&tid("t1")).await.unwrap();

        let raw = hub.connect();
        raw.publish("thread/t1", b"not json".to_vec()).await.unwrap();
        raw.publish(
            "thread/t1",
            br#"{"kind":"control","thread_id":"t1","from":"0101010101010101010101010101010101010101010101010101010101010101","event":{"type":"explode","at":1}}"#.to_vec(),
        )
        .await
        .unwrap();
        raw.publish("thread/t1", leave("t2").to_bytes().unwrap()).await.unwrap();
        raw.publish("thread/t1", leave("t1").to_bytes().unwrap()).await.unwrap();

        let got = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, leave("t1"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let hub = MemoryEventHub::new();
        let (tx, _rx) = mpsc::channel(8);
        let mgr = SubscriptionManager::new(Arc::new(hub.connect()), tx);
        mgr.subscribe(&tid("t1")).await.unwrap();
        mgr.subscribe(&tid("t1")).await.unwrap();
        assert_eq!(hub.subscriber_count("thread/t1").await, 1);

        mgr.unsubscribe(&tid("t1")).await.unwrap();
        assert!(!mgr.is_subscribed(&tid("t1")).await);
        assert_eq!(hub.subscriber_count("thread/t1").await, 0);
    }

    #[tokio::test]
    async fn test_offline_publish_is_channel_error() {
        let hub = MemoryEventHub::new();
        let (tx, _rx) = mpsc::channel(8);
        let mgr = SubscriptionManager::new(Arc::new(hub.connect()), tx);
        hub.set_offline(true);
        let err = mgr.publish(&leave("t1")).await.unwrap_err();
        assert_eq!(err.kind(), cinder_core::ErrorKind::Network);
    }
}
