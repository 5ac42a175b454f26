//! Database schema migrations for SQLite.
//!
//! Each migration transforms the schema from version N to N+1 and is
//! recorded in `schema_migrations`.

use rusqlite::Connection;

use cinder_core::now_millis;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 2;

/// Initialize or migrate the database schema.
///
/// Idempotent: safe to call on every open.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now_millis()],
            )?;
        }

        tx.commit()?;
        tracing::debug!(from = current, to = CURRENT_VERSION, "migrated schema");
    }

    Ok(())
}

/// Current schema version of an open connection.
pub fn schema_version(conn: &Connection) -> Result<u32> {
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?)
}

fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        2 => apply_v2(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: messages and threads.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE messages (
            id TEXT PRIMARY KEY,
            thread_id TEXT NOT NULL,
            author BLOB NOT NULL,            -- 32 bytes, X25519 public key
            body_kind TEXT NOT NULL,         -- 'plaintext' | 'ciphertext'
            body BLOB NOT NULL,
            delivery TEXT NOT NULL,
            timestamp INTEGER NOT NULL,      -- Unix ms
            revision INTEGER NOT NULL,
            origin TEXT NOT NULL,            -- 'local' | 'remote'
            seq INTEGER NOT NULL             -- insertion order, kept across upserts
        );

        CREATE INDEX idx_messages_thread ON messages(thread_id, timestamp, seq);

        CREATE TABLE threads (
            thread_id TEXT PRIMARY KEY,
            identity_kind TEXT NOT NULL,
            local_key BLOB NOT NULL,
            peer_key BLOB,
            inviter_id TEXT,
            policy BLOB NOT NULL,            -- CBOR ThreadPolicy
            status TEXT NOT NULL,
            ct_txid BLOB,
            ct_vout INTEGER,
            content_hash BLOB,
            hint_url TEXT,
            wrapped_key BLOB,
            data_tokens BLOB NOT NULL,       -- CBOR Vec<DataTokenRecord>
            peer_label TEXT,
            blocked_reason TEXT,
            created_at INTEGER NOT NULL,
            accepted_at INTEGER,
            updated_at INTEGER NOT NULL,
            burned_at INTEGER,
            left_at INTEGER,
            metadata_revision INTEGER NOT NULL DEFAULT 0,
            message_revision INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX idx_threads_inviter ON threads(inviter_id);
        "#,
    )?;
    Ok(())
}

/// Migration v2: blocked inviters and local content keys.
fn apply_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE blocked_inviters (
            id TEXT PRIMARY KEY,
            reason TEXT,
            blocked_at INTEGER NOT NULL
        );

        CREATE TABLE content_keys (
            thread_id TEXT PRIMARY KEY,
            key BLOB NOT NULL                -- 32 bytes
        );
        "#,
    )?;
    Ok(())
}
