//! SQLite implementation of the store traits.
//!
//! This is the primary storage backend. It uses rusqlite with bundled
//! SQLite, wrapped in async via tokio::spawn_blocking.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use rusqlite::{params, Connection, OptionalExtension};
use zeroize::Zeroizing;

use cinder_core::{
    now_millis, BlockedInviter, ContentHash, DataTokenRecord, Message, MessageBody, MessageDraft,
    MessageId, MessagePatch, Outpoint, PublicKey, Thread, ThreadId, ThreadPolicy, Txid,
};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{KeyStore, MessageVault, ThreadStore};

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(mut conn: Connection) -> Result<Self> {
        // deleted key rows must not linger in free pages
        conn.pragma_update(None, "secure_delete", "ON")?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock()?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
    }
}

fn to_array32(field: &str, bytes: Vec<u8>) -> Result<[u8; 32]> {
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| StoreError::InvalidData(format!("{}: expected 32 bytes, got {}", field, b.len())))
}

fn to_cbor<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(buf)
}

fn from_cbor<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    ciborium::from_reader(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn invalid(e: impl std::fmt::Display) -> StoreError {
    StoreError::InvalidData(e.to_string())
}

// ─────────────────────────────────────────────────────────────────────────────
// Row mapping
// ─────────────────────────────────────────────────────────────────────────────

const MESSAGE_COLUMNS: &str =
    "id, thread_id, author, body_kind, body, delivery, timestamp, revision, origin, seq";

struct MessageRow {
    id: String,
    thread_id: String,
    author: Vec<u8>,
    body_kind: String,
    body: Vec<u8>,
    delivery: String,
    timestamp: i64,
    revision: i64,
    origin: String,
    seq: i64,
}

impl MessageRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            thread_id: row.get("thread_id")?,
            author: row.get("author")?,
            body_kind: row.get("body_kind")?,
            body: row.get("body")?,
            delivery: row.get("delivery")?,
            timestamp: row.get("timestamp")?,
            revision: row.get("revision")?,
            origin: row.get("origin")?,
            seq: row.get("seq")?,
        })
    }

    fn into_message(self) -> Result<Message> {
        let body = match self.body_kind.as_str() {
            "plaintext" => MessageBody::Plaintext(String::from_utf8(self.body).map_err(invalid)?),
            "ciphertext" => MessageBody::Ciphertext(Bytes::from(self.body)),
            other => return Err(invalid(format!("unknown body kind {}", other))),
        };
        Ok(Message {
            id: MessageId::new(self.id).map_err(invalid)?,
            thread_id: ThreadId::new(self.thread_id).map_err(invalid)?,
            author: PublicKey::from_bytes(to_array32("author", self.author)?),
            body,
            delivery: self.delivery.parse().map_err(invalid)?,
            timestamp: self.timestamp,
            revision: self.revision as u64,
            origin: self.origin.parse().map_err(invalid)?,
            seq: self.seq as u64,
        })
    }
}

fn body_columns(body: &MessageBody) -> (&'static str, Vec<u8>) {
    match body {
        MessageBody::Plaintext(s) => ("plaintext", s.as_bytes().to_vec()),
        MessageBody::Ciphertext(b) => ("ciphertext", b.to_vec()),
    }
}

fn write_message(conn: &Connection, m: &Message) -> Result<()> {
    let (body_kind, body) = body_columns(&m.body);
    conn.execute(
        "INSERT OR REPLACE INTO messages (
            id, thread_id, author, body_kind, body, delivery, timestamp, revision, origin, seq
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            m.id.as_str(),
            m.thread_id.as_str(),
            m.author.as_bytes().as_slice(),
            body_kind,
            body,
            m.delivery.as_str(),
            m.timestamp,
            m.revision as i64,
            m.origin.as_str(),
            m.seq as i64,
        ],
    )?;
    Ok(())
}

fn read_message(conn: &Connection, id: &str) -> Result<Option<Message>> {
    let row = conn
        .query_row(
            &format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS),
            params![id],
            MessageRow::read,
        )
        .optional()?;
    row.map(MessageRow::into_message).transpose()
}

const THREAD_COLUMNS: &str = "thread_id, identity_kind, local_key, peer_key, inviter_id, policy, \
    status, ct_txid, ct_vout, content_hash, hint_url, wrapped_key, data_tokens, peer_label, \
    blocked_reason, created_at, accepted_at, updated_at, burned_at, left_at, metadata_revision, \
    message_revision";

struct ThreadRow {
    thread_id: String,
    identity_kind: String,
    local_key: Vec<u8>,
    peer_key: Option<Vec<u8>>,
    inviter_id: Option<String>,
    policy: Vec<u8>,
    status: String,
    ct_txid: Option<Vec<u8>>,
    ct_vout: Option<i64>,
    content_hash: Option<Vec<u8>>,
    hint_url: Option<String>,
    wrapped_key: Option<Vec<u8>>,
    data_tokens: Vec<u8>,
    peer_label: Option<String>,
    blocked_reason: Option<String>,
    created_at: i64,
    accepted_at: Option<i64>,
    updated_at: i64,
    burned_at: Option<i64>,
    left_at: Option<i64>,
    metadata_revision: i64,
    message_revision: i64,
}

impl ThreadRow {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            thread_id: row.get("thread_id")?,
            identity_kind: row.get("identity_kind")?,
            local_key: row.get("local_key")?,
            peer_key: row.get("peer_key")?,
            inviter_id: row.get("inviter_id")?,
            policy: row.get("policy")?,
            status: row.get("status")?,
            ct_txid: row.get("ct_txid")?,
            ct_vout: row.get("ct_vout")?,
            content_hash: row.get("content_hash")?,
            hint_url: row.get("hint_url")?,
            wrapped_key: row.get("wrapped_key")?,
            data_tokens: row.get("data_tokens")?,
            peer_label: row.get("peer_label")?,
            blocked_reason: row.get("blocked_reason")?,
            created_at: row.get("created_at")?,
            accepted_at: row.get("accepted_at")?,
            updated_at: row.get("updated_at")?,
            burned_at: row.get("burned_at")?,
            left_at: row.get("left_at")?,
            metadata_revision: row.get("metadata_revision")?,
            message_revision: row.get("message_revision")?,
        })
    }

    fn into_thread(self) -> Result<Thread> {
        let control_token = match (self.ct_txid, self.ct_vout) {
            (Some(txid), Some(vout)) => Some(Outpoint::new(
                Txid::from_bytes(to_array32("ct_txid", txid)?),
                cinder_core::validate_vout(vout).map_err(invalid)?,
            )),
            (None, None) => None,
            _ => return Err(invalid("control token txid and vout must both be set")),
        };
        let policy: ThreadPolicy = from_cbor(&self.policy)?;
        let data_tokens: Vec<DataTokenRecord> = from_cbor(&self.data_tokens)?;

        Ok(Thread {
            thread_id: ThreadId::new(self.thread_id).map_err(invalid)?,
            identity_kind: self.identity_kind.parse().map_err(invalid)?,
            local_key: PublicKey::from_bytes(to_array32("local_key", self.local_key)?),
            peer_key: self
                .peer_key
                .map(|b| to_array32("peer_key", b).map(PublicKey::from_bytes))
                .transpose()?,
            inviter_id: self.inviter_id,
            policy,
            status: self.status.parse().map_err(invalid)?,
            control_token,
            content_hash: self
                .content_hash
                .map(|b| to_array32("content_hash", b).map(ContentHash::from_bytes))
                .transpose()?,
            hint_url: self.hint_url,
            wrapped_key: self.wrapped_key,
            data_tokens,
            peer_label: self.peer_label,
            blocked_reason: self.blocked_reason,
            created_at: self.created_at,
            accepted_at: self.accepted_at,
            updated_at: self.updated_at,
            burned_at: self.burned_at,
            left_at: self.left_at,
            metadata_revision: self.metadata_revision as u64,
            message_revision: self.message_revision as u64,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// MessageVault
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl MessageVault for SqliteStore {
    async fn save(&self, thread_id: &ThreadId, mut draft: MessageDraft) -> Result<Message> {
        let thread_id = thread_id.clone();
        self.blocking(move |conn| {
            let tx = conn.transaction()?;

            let existing: Option<(String, i64, i64)> = match &draft.id {
                Some(id) => tx
                    .query_row(
                        "SELECT thread_id, seq, timestamp FROM messages WHERE id = ?1",
                        params![id.as_str()],
                        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                    )
                    .optional()?,
                None => None,
            };

            let seq = match existing {
                Some((owner, _, _)) if owner != thread_id.as_str() => {
                    return Err(StoreError::Conflict(format!(
                        "message belongs to thread {}",
                        owner
                    )));
                }
                Some((_, seq, timestamp)) => {
                    draft.timestamp.get_or_insert(timestamp);
                    seq
                }
                None => tx.query_row("SELECT COALESCE(MAX(seq), 0) + 1 FROM messages", [], |row| {
                    row.get(0)
                })?,
            };

            let message = draft.into_message(thread_id, seq as u64, now_millis());
            write_message(&tx, &message)?;
            tx.commit()?;
            Ok(message)
        })
        .await
    }

    async fn get(&self, id: &MessageId) -> Result<Option<Message>> {
        let id = id.clone();
        self.blocking(move |conn| read_message(conn, id.as_str())).await
    }

    async fn update(&self, id: &MessageId, patch: MessagePatch) -> Result<Message> {
        let id = id.clone();
        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            let mut message = read_message(&tx, id.as_str())?
                .ok_or_else(|| StoreError::NotFound(format!("message {}", id)))?;
            patch.apply(&mut message);
            write_message(&tx, &message)?;
            tx.commit()?;
            Ok(message)
        })
        .await
    }

    async fn list_by_thread(&self, thread_id: &ThreadId) -> Result<Vec<Message>> {
        let thread_id = thread_id.clone();
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM messages WHERE thread_id = ?1 ORDER BY timestamp, seq",
                MESSAGE_COLUMNS
            ))?;
            let rows = stmt
                .query_map(params![thread_id.as_str()], MessageRow::read)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter().map(MessageRow::into_message).collect()
        })
        .await
    }

    async fn purge_thread(&self, thread_id: &ThreadId) -> Result<usize> {
        let thread_id = thread_id.clone();
        self.blocking(move |conn| {
            Ok(conn.execute(
                "DELETE FROM messages WHERE thread_id = ?1",
                params![thread_id.as_str()],
            )?)
        })
        .await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ThreadStore
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl ThreadStore for SqliteStore {
    async fn put_thread(&self, thread: &Thread) -> Result<()> {
        let t = thread.clone();
        let policy = to_cbor(&t.policy)?;
        let data_tokens = to_cbor(&t.data_tokens)?;
        self.blocking(move |conn| {
            conn.execute(
                &format!(
                    "INSERT OR REPLACE INTO threads ({}) VALUES (
                        ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11,
                        ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22
                    )",
                    THREAD_COLUMNS
                ),
                params![
                    t.thread_id.as_str(),
                    t.identity_kind.as_str(),
                    t.local_key.as_bytes().as_slice(),
                    t.peer_key.as_ref().map(|k| k.as_bytes().to_vec()),
                    t.inviter_id,
                    policy,
                    t.status.as_str(),
                    t.control_token.map(|op| op.txid.as_bytes().to_vec()),
                    t.control_token.map(|op| i64::from(op.vout)),
                    t.content_hash.map(|h| h.as_bytes().to_vec()),
                    t.hint_url,
                    t.wrapped_key,
                    data_tokens,
                    t.peer_label,
                    t.blocked_reason,
                    t.created_at,
                    t.accepted_at,
                    t.updated_at,
                    t.burned_at,
                    t.left_at,
                    t.metadata_revision as i64,
                    t.message_revision as i64,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_thread(&self, id: &ThreadId) -> Result<Option<Thread>> {
        let id = id.clone();
        self.blocking(move |conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {} FROM threads WHERE thread_id = ?1", THREAD_COLUMNS),
                    params![id.as_str()],
                    ThreadRow::read,
                )
                .optional()?;
            row.map(ThreadRow::into_thread).transpose()
        })
        .await
    }

    async fn list_threads(&self) -> Result<Vec<Thread>> {
        self.blocking(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM threads ORDER BY created_at, thread_id",
                THREAD_COLUMNS
            ))?;
            let rows = stmt
                .query_map([], ThreadRow::read)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter().map(ThreadRow::into_thread).collect()
        })
        .await
    }

    async fn delete_thread(&self, id: &ThreadId) -> Result<bool> {
        let id = id.clone();
        self.blocking(move |conn| {
            let n = conn.execute("DELETE FROM threads WHERE thread_id = ?1", params![id.as_str()])?;
            Ok(n > 0)
        })
        .await
    }

    async fn put_blocked_inviter(&self, inviter: &BlockedInviter) -> Result<()> {
        let inviter = inviter.clone();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO blocked_inviters (id, reason, blocked_at) VALUES (?1, ?2, ?3)",
                params![inviter.id, inviter.reason, inviter.blocked_at],
            )?;
            Ok(())
        })
        .await
    }

    async fn remove_blocked_inviter(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.blocking(move |conn| {
            let n = conn.execute("DELETE FROM blocked_inviters WHERE id = ?1", params![id])?;
            Ok(n > 0)
        })
        .await
    }

    async fn list_blocked_inviters(&self) -> Result<Vec<BlockedInviter>> {
        self.blocking(|conn| {
            let mut stmt =
                conn.prepare("SELECT id, reason, blocked_at FROM blocked_inviters ORDER BY id")?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(BlockedInviter {
                        id: row.get(0)?,
                        reason: row.get(1)?,
                        blocked_at: row.get(2)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// KeyStore
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl KeyStore for SqliteStore {
    async fn put_key(&self, thread_id: &ThreadId, key: &[u8; 32]) -> Result<()> {
        let thread_id = thread_id.clone();
        let key = Zeroizing::new(*key);
        self.blocking(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO content_keys (thread_id, key) VALUES (?1, ?2)",
                params![thread_id.as_str(), key.as_slice()],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_key(&self, thread_id: &ThreadId) -> Result<Option<Zeroizing<[u8; 32]>>> {
        let thread_id = thread_id.clone();
        self.blocking(move |conn| {
            let bytes: Option<Vec<u8>> = conn
                .query_row(
                    "SELECT key FROM content_keys WHERE thread_id = ?1",
                    params![thread_id.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            match bytes {
                Some(b) => {
                    let b = Zeroizing::new(b);
                    let arr: [u8; 32] = b.as_slice().try_into().map_err(|_| {
                        StoreError::InvalidData(format!("content key: expected 32 bytes, got {}", b.len()))
                    })?;
                    Ok(Some(Zeroizing::new(arr)))
                }
                None => Ok(None),
            }
        })
        .await
    }

    async fn erase_key(&self, thread_id: &ThreadId) -> Result<bool> {
        let thread_id = thread_id.clone();
        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "UPDATE content_keys SET key = zeroblob(32) WHERE thread_id = ?1",
                params![thread_id.as_str()],
            )?;
            let n = tx.execute(
                "DELETE FROM content_keys WHERE thread_id = ?1",
                params![thread_id.as_str()],
            )?;
            tx.commit()?;
            Ok(n > 0)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinder_core::{
        DataTokenPermissions, DeliveryStatus, IdentityKind, ThreadStatus, WriteOrigin,
    };

    fn tid(s: &str) -> ThreadId {
        ThreadId::new(s).unwrap()
    }

    fn author() -> PublicKey {
        PublicKey::from_bytes([1; 32])
    }

    fn full_thread() -> Thread {
        let mut t = Thread::new(
            tid("t1"),
            IdentityKind::Guest,
            author(),
            ThreadPolicy::default(),
            100,
        );
        t.peer_key = Some(PublicKey::from_bytes([2; 32]));
        t.inviter_id = Some("alice".into());
        t.status = ThreadStatus::Active;
        t.control_token = Some(Outpoint::new(Txid::from_bytes([3; 32]), 1));
        t.content_hash = Some(ContentHash::compute(b"c"));
        t.hint_url = Some("mem://x".into());
        t.wrapped_key = Some(vec![9; 92]);
        t.data_tokens.push(DataTokenRecord {
            outpoint: Outpoint::new(Txid::from_bytes([4; 32]), 0),
            recipient: PublicKey::from_bytes([2; 32]),
            permissions: DataTokenPermissions::Read,
            wrapped_key: Some(vec![8; 92]),
            issued_at: 101,
        });
        t.metadata_revision = 3;
        t
    }

    #[tokio::test]
    async fn test_thread_roundtrip() {
        let store = SqliteStore::open_memory().unwrap();
        let thread = full_thread();
        store.put_thread(&thread).await.unwrap();

        let loaded = store.get_thread(&tid("t1")).await.unwrap().unwrap();
        assert_eq!(loaded, thread);
        assert_eq!(store.list_threads().await.unwrap(), vec![thread]);
    }

    #[tokio::test]
    async fn test_burned_thread_persists_without_keys() {
        let store = SqliteStore::open_memory().unwrap();
        let mut thread = full_thread();
        thread.mark_burned(200);
        store.put_thread(&thread).await.unwrap();

        let loaded = store.get_thread(&tid("t1")).await.unwrap().unwrap();
        assert_eq!(loaded.status, ThreadStatus::Burned);
        assert!(!loaded.holds_key_material());
        assert!(loaded.control_token.is_none());
    }

    #[tokio::test]
    async fn test_message_upsert_keeps_seq() {
        let store = SqliteStore::open_memory().unwrap();
        let t = tid("t1");
        let id = MessageId::new("m1").unwrap();

        let first = store
            .save(
                &t,
                MessageDraft::text(author(), "v1")
                    .with_id(id.clone())
                    .with_timestamp(100),
            )
            .await
            .unwrap();
        store
            .save(&t, MessageDraft::text(author(), "other").with_timestamp(200))
            .await
            .unwrap();
        let again = store
            .save(
                &t,
                MessageDraft::text(author(), "v2")
                    .with_id(id.clone())
                    .with_revision(2)
                    .with_origin(WriteOrigin::Remote),
            )
            .await
            .unwrap();

        assert_eq!(first.seq, again.seq);
        assert_eq!(again.timestamp, 100);
        let stored = store.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.body, MessageBody::Plaintext("v2".into()));
        assert_eq!(stored.revision, 2);
        assert_eq!(stored.origin, WriteOrigin::Remote);
        let listed = store.list_by_thread(&t).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, id);
    }

    #[tokio::test]
    async fn test_ciphertext_body_and_update() {
        let store = SqliteStore::open_memory().unwrap();
        let msg = store
            .save(
                &tid("t1"),
                MessageDraft::new(author(), MessageBody::Ciphertext(Bytes::from_static(b"\x00\x01"))),
            )
            .await
            .unwrap();
        let updated = store
            .update(&msg.id, MessagePatch::delivery(DeliveryStatus::Delivered))
            .await
            .unwrap();
        assert_eq!(updated.delivery, DeliveryStatus::Delivered);
        assert_eq!(store.get(&msg.id).await.unwrap().unwrap(), updated);
    }

    #[tokio::test]
    async fn test_purge_then_list_empty() {
        let store = SqliteStore::open_memory().unwrap();
        for i in 0..4 {
            store
                .save(&tid("t1"), MessageDraft::text(author(), format!("m{}", i)))
                .await
                .unwrap();
        }
        assert_eq!(store.purge_thread(&tid("t1")).await.unwrap(), 4);
        assert!(store.list_by_thread(&tid("t1")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cinder.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.put_thread(&full_thread()).await.unwrap();
            store.put_key(&tid("t1"), &[5; 32]).await.unwrap();
            store
                .save(&tid("t1"), MessageDraft::text(author(), "kept"))
                .await
                .unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert!(store.get_thread(&tid("t1")).await.unwrap().is_some());
        assert_eq!(*store.get_key(&tid("t1")).await.unwrap().unwrap(), [5; 32]);
        assert_eq!(store.list_by_thread(&tid("t1")).await.unwrap().len(), 1);

        assert!(store.erase_key(&tid("t1")).await.unwrap());
        assert!(store.get_key(&tid("t1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_blocked_inviters() {
        let store = SqliteStore::open_memory().unwrap();
        store
            .put_blocked_inviter(&BlockedInviter {
                id: "mallory".into(),
                reason: Some("spam".into()),
                blocked_at: 7,
            })
            .await
            .unwrap();
        let list = store.list_blocked_inviters().await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].reason.as_deref(), Some("spam"));
        assert!(store.remove_blocked_inviter("mallory").await.unwrap());
        assert!(store.list_blocked_inviters().await.unwrap().is_empty());
    }
}
