//! Identity and emotion-history persistence.

use crate::emotion::{parse_label, IdentityEmotion, RawEmotion};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::ValueRef;
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use std::path::Path;
use thiserror::Error;
use tokio_rusqlite::Connection;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS identities (
    id              TEXT PRIMARY KEY,
    name            TEXT NOT NULL,
    current_emotion,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS emotion_history (
    seq             INTEGER PRIMARY KEY AUTOINCREMENT,
    identity_id     TEXT NOT NULL REFERENCES identities(id) ON DELETE CASCADE,
    emotion,
    confidence      REAL NOT NULL,
    recorded_at     TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_history_identity ON emotion_history(identity_id, seq);
";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("identity not found: {0}")]
    IdentityNotFound(String),
    #[error("database: {0}")]
    Database(#[from] tokio_rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// One appended history record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub emotion: IdentityEmotion,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Identity {
    pub id: String,
    pub name: String,
    pub current_emotion: IdentityEmotion,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only emotion timeline per identity.
#[async_trait]
pub trait HistoryStore: Send + Sync + 'static {
    /// Append one entry and make it the identity's current emotion.
    async fn append_history(
        &self,
        identity_id: &str,
        emotion: IdentityEmotion,
        confidence: f32,
        timestamp: DateTime<Utc>,
    ) -> Result<HistoryEntry, StoreError>;

    /// The most recent `limit` entries, oldest first.
    async fn history(&self, identity_id: &str, limit: usize) -> Result<Vec<HistoryEntry>, StoreError>;

    async fn get_identity(&self, identity_id: &str) -> Result<Option<Identity>, StoreError>;

    async fn create_identity(&self, name: &str) -> Result<Identity, StoreError>;
}

/// SQLite-backed [`HistoryStore`].
pub struct SqliteHistoryStore {
    conn: Connection,
}

impl SqliteHistoryStore {
    /// Open (creating if needed) the database at `path`.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).await?;
        let store = Self::init(conn).await?;
        tracing::info!(path = %path.display(), "history store opened");
        Ok(store)
    }

    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.call(|conn| {
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }
}

fn raw_emotion(value: ValueRef<'_>) -> RawEmotion {
    match value {
        ValueRef::Integer(code) => RawEmotion::Code(code),
        ValueRef::Real(code) => RawEmotion::Code(code as i64),
        ValueRef::Text(text) => RawEmotion::Text(String::from_utf8_lossy(text).into_owned()),
        ValueRef::Null | ValueRef::Blob(_) => RawEmotion::Missing,
    }
}

#[async_trait]
impl HistoryStore for SqliteHistoryStore {
    async fn append_history(
        &self,
        identity_id: &str,
        emotion: IdentityEmotion,
        confidence: f32,
        timestamp: DateTime<Utc>,
    ) -> Result<HistoryEntry, StoreError> {
        let id = identity_id.to_string();
        let appended = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let exists = tx
                    .query_row("SELECT 1 FROM identities WHERE id = ?1", params![id], |_| Ok(()))
                    .optional()?
                    .is_some();
                if !exists {
                    return Ok(false);
                }
                tx.execute(
                    "INSERT INTO emotion_history (identity_id, emotion, confidence, recorded_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![id, emotion.code(), confidence as f64, timestamp],
                )?;
                tx.execute(
                    "UPDATE identities SET current_emotion = ?2, updated_at = ?3 WHERE id = ?1",
                    params![id, emotion.code(), timestamp],
                )?;
                tx.commit()?;
                Ok(true)
            })
            .await?;

        if !appended {
            return Err(StoreError::IdentityNotFound(identity_id.to_string()));
        }

        tracing::debug!(identity = identity_id, %emotion, confidence, "history entry appended");
        Ok(HistoryEntry { timestamp, emotion, confidence })
    }

    async fn history(&self, identity_id: &str, limit: usize) -> Result<Vec<HistoryEntry>, StoreError> {
        let id = identity_id.to_string();
        let limit = limit.min(i64::MAX as usize) as i64;
        let mut entries = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT recorded_at, emotion, confidence FROM emotion_history
                     WHERE identity_id = ?1 ORDER BY seq DESC LIMIT ?2",
                )?;
                let rows = stmt
                    .query_map(params![id, limit], |row| {
                        Ok(HistoryEntry {
                            timestamp: row.get(0)?,
                            emotion: parse_label(&raw_emotion(row.get_ref(1)?)),
                            confidence: row.get::<_, f64>(2)? as f32,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        entries.reverse();
        Ok(entries)
    }

    async fn get_identity(&self, identity_id: &str) -> Result<Option<Identity>, StoreError> {
        let id = identity_id.to_string();
        let identity = self
            .conn
            .call(move |conn| {
                let identity = conn
                    .query_row(
                        "SELECT id, name, current_emotion, created_at, updated_at
                         FROM identities WHERE id = ?1",
                        params![id],
                        |row| {
                            Ok(Identity {
                                id: row.get(0)?,
                                name: row.get(1)?,
                                current_emotion: parse_label(&raw_emotion(row.get_ref(2)?)),
                                created_at: row.get(3)?,
                                updated_at: row.get(4)?,
                            })
                        },
                    )
                    .optional()?;
                Ok(identity)
            })
            .await?;
        Ok(identity)
    }

    async fn create_identity(&self, name: &str) -> Result<Identity, StoreError> {
        let now = Utc::now();
        let identity = Identity {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            current_emotion: IdentityEmotion::DEFAULT,
            created_at: now,
            updated_at: now,
        };
        let row = identity.clone();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO identities (id, name, current_emotion, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![row.id, row.name, row.current_emotion.code(), row.created_at, row.updated_at],
                )?;
                Ok(())
            })
            .await?;
        tracing::info!(id = %identity.id, name, "identity created");
        Ok(identity)
    }
}
