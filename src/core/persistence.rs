//! Durable session storage using SQLite
//!
//! The device-local store is a flat key/value table. The conversation log is
//! kept under a single key and always holds the current full log, so saving
//! after every mutation never grows the database.
//!
//! Every public operation fails open: read problems fall back to defaults and
//! write problems are logged and dropped.

use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use thiserror::Error;

use crate::conversation::{
    new_entry_id, ConversationEntry, Origin, ResponseStyle, SessionState, DEFAULT_AVATAR,
};

pub const CONVERSATIONS_KEY: &str = "conversations";
pub const STYLE_KEY: &str = "response_style";
pub const USER_KEY: &str = "session_user";
pub const AVATAR_KEY: &str = "companion_avatar";

/// Keys wiped on logout; the avatar is a device preference and survives
const SESSION_KEYS: [&str; 3] = [CONVERSATIONS_KEY, STYLE_KEY, USER_KEY];

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// On-disk shape of an entry. Loose on purpose so older or hand-edited
/// records still load.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEntry {
    #[serde(default)]
    id: Option<String>,
    text: String,
    origin: Origin,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    response_style: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    safety_flag: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    emotion: Option<String>,
}

impl From<&ConversationEntry> for StoredEntry {
    fn from(entry: &ConversationEntry) -> Self {
        Self {
            id: Some(entry.id.clone()),
            text: entry.text.clone(),
            origin: entry.origin,
            timestamp: Some(entry.created_at.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            response_style: entry.response_style.map(|s| s.as_str().to_string()),
            safety_flag: entry.safety_flag,
            emotion: entry.emotion.clone(),
        }
    }
}

/// Gateway between the in-memory session and the device store
pub struct PersistenceGateway {
    pool: SqlitePool,
}

impl PersistenceGateway {
    /// Open (or create) the database at the given path
    pub async fn new(db_path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let gateway = Self { pool };
        gateway.init_schema().await?;
        Ok(gateway)
    }

    /// Create an in-memory store. The database lives only as long as its
    /// single connection, so the pool must never recycle it.
    pub async fn new_in_memory() -> Result<Self, StorageError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        let gateway = Self { pool };
        gateway.init_schema().await?;
        Ok(gateway)
    }

    /// Open the on-disk store, or fall back to an in-memory one so the
    /// conversation can still run without history
    pub async fn open_or_ephemeral(db_path: &Path) -> Result<Self, StorageError> {
        match Self::new(db_path).await {
            Ok(gateway) => Ok(gateway),
            Err(e) => {
                tracing::warn!(
                    path = %db_path.display(),
                    error = %e,
                    "could not open session store, history will not survive restarts"
                );
                Self::new_in_memory().await
            }
        }
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM kv WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|(value,)| value))
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO kv (key, value, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn remove_all(&self, keys: &[&str]) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;
        for key in keys {
            sqlx::query("DELETE FROM kv WHERE key = ?")
                .bind(*key)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn put_or_warn(&self, key: &str, value: &str) {
        if let Err(e) = self.put(key, value).await {
            tracing::warn!(key, error = %e, "failed to persist value");
        }
    }

    async fn get_or_warn(&self, key: &str) -> Option<String> {
        match self.get(key).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key, error = %e, "failed to read stored value");
                None
            }
        }
    }

    /// Overwrite the stored log with the given full sequence
    pub async fn save_entries(&self, entries: &[ConversationEntry]) {
        let stored: Vec<StoredEntry> = entries.iter().map(StoredEntry::from).collect();
        match serde_json::to_string(&stored) {
            Ok(json) => self.put_or_warn(CONVERSATIONS_KEY, &json).await,
            Err(e) => tracing::warn!(error = %e, "failed to serialize conversation"),
        }
    }

    /// Load the stored log. A first run, or a log that can no longer be
    /// parsed, yields the welcome conversation.
    pub async fn load_entries(&self) -> Vec<ConversationEntry> {
        let Some(raw) = self.get_or_warn(CONVERSATIONS_KEY).await else {
            return vec![ConversationEntry::welcome()];
        };

        match serde_json::from_str::<Vec<StoredEntry>>(&raw) {
            Ok(stored) => normalize_entries(stored, Utc::now()),
            Err(e) => {
                tracing::warn!(error = %e, "stored conversation is malformed, starting fresh");
                vec![ConversationEntry::welcome()]
            }
        }
    }

    pub async fn save_style_preference(&self, style: ResponseStyle) {
        self.put_or_warn(STYLE_KEY, style.as_str()).await;
    }

    pub async fn load_style_preference(&self) -> Option<ResponseStyle> {
        let raw = self.get_or_warn(STYLE_KEY).await?;
        match raw.parse() {
            Ok(style) => Some(style),
            Err(e) => {
                tracing::warn!(error = %e, "ignoring stored style preference");
                None
            }
        }
    }

    pub async fn save_avatar(&self, avatar: &str) {
        self.put_or_warn(AVATAR_KEY, avatar).await;
    }

    pub async fn load_avatar(&self) -> Option<String> {
        self.get_or_warn(AVATAR_KEY).await
    }

    pub async fn save_user_id(&self, user_id: &str) {
        self.put_or_warn(USER_KEY, user_id).await;
    }

    pub async fn load_user_id(&self) -> Option<String> {
        self.get_or_warn(USER_KEY).await
    }

    pub async fn clear_user_id(&self) {
        if let Err(e) = self.remove_all(&[USER_KEY]).await {
            tracing::warn!(error = %e, "failed to clear stored identity");
        }
    }

    /// Remove the log and all session-scoped values in one transaction
    pub async fn clear_all(&self) {
        if let Err(e) = self.remove_all(&SESSION_KEYS).await {
            tracing::warn!(error = %e, "failed to clear stored session");
        }
    }

    /// Rebuild a full session from storage
    pub async fn load_session(&self) -> SessionState {
        let entries = self.load_entries().await;
        let current_style = self.load_style_preference().await.unwrap_or_default();
        let companion_avatar = self
            .load_avatar()
            .await
            .unwrap_or_else(|| DEFAULT_AVATAR.to_string());

        tracing::info!(entries = entries.len(), style = %current_style, "session rehydrated");

        SessionState {
            entries,
            current_style,
            pending: false,
            companion_avatar,
        }
    }

    #[cfg(test)]
    async fn put_raw(&self, key: &str, value: &str) {
        self.put(key, value).await.unwrap();
    }
}

/// Turn stored records back into entries, keeping their stored order.
///
/// Missing or unparsable timestamps take the closest earlier valid one,
/// else the first later valid one, else `now`. Missing or repeated ids are
/// reissued and records with empty text are dropped.
fn normalize_entries(stored: Vec<StoredEntry>, now: DateTime<Utc>) -> Vec<ConversationEntry> {
    let parsed: Vec<Option<DateTime<Utc>>> = stored
        .iter()
        .map(|s| s.timestamp.as_deref().and_then(parse_timestamp))
        .collect();
    let first_valid = parsed.iter().flatten().next().copied();

    let mut seen = HashSet::new();
    let mut last_valid: Option<DateTime<Utc>> = None;
    let mut entries = Vec::with_capacity(stored.len());

    for (record, timestamp) in stored.into_iter().zip(parsed) {
        let created_at = match timestamp {
            Some(ts) => {
                last_valid = Some(ts);
                ts
            }
            None => last_valid.or(first_valid).unwrap_or(now),
        };

        if record.text.trim().is_empty() {
            tracing::debug!("dropping stored entry with empty text");
            continue;
        }

        let id = match record.id {
            Some(id) if !id.is_empty() && !seen.contains(&id) => id,
            _ => new_entry_id(),
        };
        seen.insert(id.clone());

        entries.push(ConversationEntry {
            id,
            text: record.text,
            origin: record.origin,
            created_at,
            response_style: record.response_style.and_then(|s| s.parse().ok()),
            safety_flag: record.safety_flag,
            emotion: record.emotion,
        });
    }

    entries
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}
