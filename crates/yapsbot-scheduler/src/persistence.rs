//! SQLite-backed store of tracked handles.
//! One row per `(chat_id, twitter_username)`; the snapshot is kept as the
//! raw Kaito JSON so new upstream fields survive a round trip.

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use yapsbot_core::error::{Result, YapsError};
use yapsbot_core::traits::TrackedHandleStore;
use yapsbot_core::types::{ScoreSnapshot, TrackedEntry, normalize_handle};

/// SQLite-backed [`TrackedHandleStore`].
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(|e| YapsError::Database(format!("DB open: {e}")))?;
        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        tracing::info!("🗄️ Database opened at {}", path.display());
        Ok(store)
    }

    /// In-memory database (tests, dry runs).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| YapsError::Database(format!("DB open: {e}")))?;
        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        self.lock()?
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS tracked_users (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    chat_id INTEGER NOT NULL,
                    twitter_username TEXT NOT NULL,
                    last_score_data TEXT NOT NULL,
                    last_updated TEXT NOT NULL,
                    UNIQUE(chat_id, twitter_username)
                );",
            )
            .map_err(|e| YapsError::Database(format!("Migration: {e}")))?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| YapsError::Database(format!("DB lock poisoned: {e}")))
    }

    /// Total number of subscriptions.
    pub fn count(&self) -> Result<usize> {
        let n: i64 = self
            .lock()?
            .query_row("SELECT COUNT(*) FROM tracked_users", [], |r| r.get(0))
            .map_err(|e| YapsError::Database(format!("Count: {e}")))?;
        Ok(n as usize)
    }

    fn query_entries(&self, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<TrackedEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| YapsError::Database(format!("Prepare: {e}")))?;

        let rows = stmt
            .query_map(params, |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(|e| YapsError::Database(format!("Query: {e}")))?;

        let mut entries = Vec::new();
        for row in rows {
            let (chat_id, handle, data) = row.map_err(|e| YapsError::Database(format!("Row: {e}")))?;
            match serde_json::from_str::<ScoreSnapshot>(&data) {
                Ok(snapshot) => entries.push(TrackedEntry {
                    chat_id,
                    handle,
                    snapshot,
                }),
                Err(e) => {
                    tracing::warn!("⚠️ Skipping {handle} in chat {chat_id}: bad score data ({e})");
                }
            }
        }
        Ok(entries)
    }
}

#[async_trait]
impl TrackedHandleStore for SqliteStore {
    async fn list_all(&self) -> Result<Vec<TrackedEntry>> {
        self.query_entries(
            "SELECT chat_id, twitter_username, last_score_data FROM tracked_users ORDER BY id",
            &[],
        )
    }

    async fn list_for_chat(&self, chat_id: i64) -> Result<Vec<TrackedEntry>> {
        self.query_entries(
            "SELECT chat_id, twitter_username, last_score_data FROM tracked_users
             WHERE chat_id = ?1 ORDER BY id",
            &[&chat_id],
        )
    }

    async fn track(&self, chat_id: i64, handle: &str, snapshot: &ScoreSnapshot) -> Result<()> {
        let data = serde_json::to_string(snapshot)?;
        self.lock()?
            .execute(
                "INSERT OR REPLACE INTO tracked_users
                 (chat_id, twitter_username, last_score_data, last_updated)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![chat_id, normalize_handle(handle), data, Utc::now().to_rfc3339()],
            )
            .map_err(|e| YapsError::Database(format!("Track: {e}")))?;
        Ok(())
    }

    async fn untrack(&self, chat_id: i64, handle: &str) -> Result<bool> {
        let changed = self
            .lock()?
            .execute(
                "DELETE FROM tracked_users WHERE chat_id = ?1 AND twitter_username = ?2",
                rusqlite::params![chat_id, normalize_handle(handle)],
            )
            .map_err(|e| YapsError::Database(format!("Untrack: {e}")))?;
        Ok(changed > 0)
    }

    async fn update_snapshot(
        &self,
        chat_id: i64,
        handle: &str,
        snapshot: &ScoreSnapshot,
    ) -> Result<()> {
        let data = serde_json::to_string(snapshot)?;
        let changed = self
            .lock()?
            .execute(
                "UPDATE tracked_users SET last_score_data = ?1, last_updated = ?2
                 WHERE chat_id = ?3 AND twitter_username = ?4",
                rusqlite::params![data, Utc::now().to_rfc3339(), chat_id, normalize_handle(handle)],
            )
            .map_err(|e| YapsError::Database(format!("Update score: {e}")))?;
        if changed == 0 {
            // Untracked while the cycle was running; nothing to update.
            tracing::debug!("No row for {handle} in chat {chat_id}, snapshot not stored");
        }
        Ok(())
    }
}
