//! Buffered store backend
//!
//! SQLite table of segment blobs keyed by an auto-increment id, so reading a
//! session back in id order returns its segments in emission order. Rows are
//! scoped by session id; a session only ever reads and clears its own rows.

use super::export::write_download;
use super::StoreError;
use crate::recorder::state::{assemble, Segment};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::path::{Path, PathBuf};

const SCHEMA_VERSION: i64 = 1;

/// Segments left behind by a session that never finalized
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSession {
    pub session_id: String,
    pub target: String,
    pub segment_count: u64,
    pub total_bytes: u64,
    pub first_segment_at: String,
}

/// SQLite-backed ordered segment store
#[derive(Clone)]
pub struct BufferedStore {
    pool: SqlitePool,
}

impl BufferedStore {
    /// Open or create the database at `db_path`
    pub async fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(
                SqliteConnectOptions::new()
                    .filename(db_path)
                    .create_if_missing(true)
                    .journal_mode(SqliteJournalMode::Wal)
                    .synchronous(SqliteSynchronous::Normal),
            )
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Self::initialize_schema(&pool).await?;

        let version: i64 = sqlx::query_scalar("SELECT version FROM schema_version")
            .fetch_one(&pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        if version != SCHEMA_VERSION {
            return Err(StoreError::Database(format!(
                "Unsupported schema version: {}",
                version
            )));
        }

        tracing::info!("Buffered store open at {}", db_path.display());

        Ok(Self { pool })
    }

    async fn initialize_schema(pool: &SqlitePool) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            )
            "#,
        )
        .execute(pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
            .bind(SCHEMA_VERSION)
            .execute(pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS segments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                target TEXT NOT NULL,
                segment_index INTEGER NOT NULL,
                data BLOB NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_segments_session ON segments(session_id, id)")
            .execute(pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }

    /// Append a segment for a session, returning its row id
    pub async fn insert(
        &self,
        session_id: &str,
        target: &str,
        segment: &Segment,
    ) -> Result<i64, StoreError> {
        let result = sqlx::query(
            "INSERT INTO segments (session_id, target, segment_index, data, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(session_id)
        .bind(target)
        .bind(segment.index as i64)
        .bind(segment.data.as_ref())
        .bind(segment.captured_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(result.last_insert_rowid())
    }

    /// All segments of a session in insertion order
    pub async fn read_session(&self, session_id: &str) -> Result<Vec<Segment>, StoreError> {
        let rows: Vec<(i64, Vec<u8>, String)> = sqlx::query_as(
            "SELECT segment_index, data, created_at FROM segments WHERE session_id = ? ORDER BY id ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|(index, data, created_at)| Segment {
                index: index.max(0) as u64,
                data: Bytes::from(data),
                captured_at: DateTime::parse_from_rfc3339(&created_at)
                    .map(|t| t.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
            })
            .collect())
    }

    /// Delete a session's rows, returning how many were removed
    pub async fn clear_session(&self, session_id: &str) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM segments WHERE session_id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(result.rows_affected())
    }

    /// Sessions that still have rows, oldest first
    pub async fn pending_sessions(&self) -> Result<Vec<PendingSession>, StoreError> {
        let rows: Vec<(String, String, i64, i64, String)> = sqlx::query_as(
            r#"
            SELECT session_id, target, COUNT(*), COALESCE(SUM(LENGTH(data)), 0), MIN(created_at)
            FROM segments
            GROUP BY session_id, target
            ORDER BY MIN(id) ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(
                |(session_id, target, count, bytes, first_segment_at)| PendingSession {
                    session_id,
                    target,
                    segment_count: count.max(0) as u64,
                    total_bytes: bytes.max(0) as u64,
                    first_segment_at,
                },
            )
            .collect())
    }

    /// Reconstruct a leftover session into the downloads directory
    ///
    /// Rows are cleared only when `clear` is set and the file was written.
    /// Returns `None` when the session has no rows.
    pub async fn export_session(
        &self,
        session_id: &str,
        dir: &Path,
        extension: &str,
        clear: bool,
    ) -> Result<Option<PathBuf>, StoreError> {
        let segments = self.read_session(session_id).await?;
        if segments.is_empty() {
            return Ok(None);
        }

        let path = write_download(dir, extension, &assemble(&segments)).await?;
        if clear {
            let removed = self.clear_session(session_id).await?;
            tracing::info!("Recovered session {} ({} segments)", session_id, removed);
        }
        Ok(Some(path))
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
