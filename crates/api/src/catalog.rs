//! Index-status catalog: durable per-file indexing state.
//!
//! A single-file SQLite database keyed by relative file path. WAL journaling
//! and a bounded busy timeout keep concurrent writers from failing under
//! normal contention; connections come from a pool and are never held across
//! external calls.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::{debug, info};
use utoipa::ToSchema;

use crate::scanner::FileMetadata;

/// Per-file indexing lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum IndexState {
    Pending,
    Processing,
    Indexed,
    Failed,
}

impl IndexState {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexState::Pending => "pending",
            IndexState::Processing => "processing",
            IndexState::Indexed => "indexed",
            IndexState::Failed => "failed",
        }
    }

    fn parse(value: &str) -> Result<Self> {
        match value {
            "pending" => Ok(IndexState::Pending),
            "processing" => Ok(IndexState::Processing),
            "indexed" => Ok(IndexState::Indexed),
            "failed" => Ok(IndexState::Failed),
            other => anyhow::bail!("unknown index state in catalog: {other}"),
        }
    }
}

/// One catalog record. Primary key is the relative file path.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct IndexStatus {
    pub file_path: String,
    pub file_hash: String,
    pub status: IndexState,
    pub indexed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub file_size: i64,
    pub last_modified: DateTime<Utc>,
}

impl IndexStatus {
    /// Fresh PENDING record for a newly observed or modified file.
    pub fn pending(meta: &FileMetadata) -> Self {
        Self {
            file_path: meta.path.clone(),
            file_hash: meta.hash.clone(),
            status: IndexState::Pending,
            indexed_at: None,
            error_message: None,
            file_size: meta.size,
            last_modified: meta.last_modified,
        }
    }

    pub fn indexed(mut self) -> Self {
        self.status = IndexState::Indexed;
        self.indexed_at = Some(Utc::now());
        self.error_message = None;
        self
    }

    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.status = IndexState::Failed;
        self.indexed_at = None;
        self.error_message = Some(error.into());
        self
    }
}

/// The whitelist of single-field updates. Field names outside this enum
/// cannot reach SQL.
#[derive(Debug, Clone)]
pub enum FieldUpdate {
    Status(IndexState),
    ErrorMessage(Option<String>),
    IndexedAt(Option<DateTime<Utc>>),
    FileHash(String),
}

impl FieldUpdate {
    fn column(&self) -> &'static str {
        match self {
            FieldUpdate::Status(_) => "status",
            FieldUpdate::ErrorMessage(_) => "error_message",
            FieldUpdate::IndexedAt(_) => "indexed_at",
            FieldUpdate::FileHash(_) => "file_hash",
        }
    }

    fn value(&self) -> Option<String> {
        match self {
            FieldUpdate::Status(state) => Some(state.as_str().to_string()),
            FieldUpdate::ErrorMessage(message) => message.clone(),
            FieldUpdate::IndexedAt(at) => at.map(|t| t.to_rfc3339()),
            FieldUpdate::FileHash(hash) => Some(hash.clone()),
        }
    }
}

/// Durable catalog of per-file index status.
pub struct IndexStatusCatalog {
    pool: SqlitePool,
}

impl IndexStatusCatalog {
    /// Open (creating if missing) the catalog at `db_path`. The parent
    /// directory is created automatically.
    pub async fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating catalog directory {}", parent.display()))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .with_context(|| format!("opening catalog database {}", db_path.display()))?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS index_status (
                file_path TEXT PRIMARY KEY,
                file_hash TEXT NOT NULL,
                status TEXT NOT NULL,
                indexed_at TEXT,
                error_message TEXT,
                file_size INTEGER NOT NULL,
                last_modified TEXT NOT NULL
            )
            ",
        )
        .execute(&pool)
        .await
        .context("initializing catalog schema")?;

        info!(path = %db_path.display(), "index-status catalog opened");
        Ok(Self { pool })
    }

    /// Atomic full-record insert-or-replace.
    pub async fn upsert(&self, status: &IndexStatus) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO index_status
                (file_path, file_hash, status, indexed_at, error_message, file_size, last_modified)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(file_path) DO UPDATE SET
                file_hash = excluded.file_hash,
                status = excluded.status,
                indexed_at = excluded.indexed_at,
                error_message = excluded.error_message,
                file_size = excluded.file_size,
                last_modified = excluded.last_modified
            ",
        )
        .bind(&status.file_path)
        .bind(&status.file_hash)
        .bind(status.status.as_str())
        .bind(status.indexed_at.map(|t| t.to_rfc3339()))
        .bind(&status.error_message)
        .bind(status.file_size)
        .bind(status.last_modified.to_rfc3339())
        .execute(&self.pool)
        .await
        .with_context(|| format!("upserting status for {}", status.file_path))?;

        debug!(path = %status.file_path, status = status.status.as_str(), "upserted status");
        Ok(())
    }

    /// Atomic single-field update, used for status transitions like the
    /// pending → processing claim.
    pub async fn update_field(&self, file_path: &str, update: FieldUpdate) -> Result<()> {
        let query = format!(
            "UPDATE index_status SET {} = ? WHERE file_path = ?",
            update.column()
        );
        sqlx::query(&query)
            .bind(update.value())
            .bind(file_path)
            .execute(&self.pool)
            .await
            .with_context(|| format!("updating {} for {file_path}", update.column()))?;

        debug!(path = file_path, field = update.column(), "updated field");
        Ok(())
    }

    pub async fn get(&self, file_path: &str) -> Result<Option<IndexStatus>> {
        let row = sqlx::query("SELECT * FROM index_status WHERE file_path = ?")
            .bind(file_path)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("reading status for {file_path}"))?;

        row.map(row_to_status).transpose()
    }

    /// All records, most recently modified first.
    pub async fn list(&self) -> Result<Vec<IndexStatus>> {
        let rows = sqlx::query("SELECT * FROM index_status ORDER BY last_modified DESC")
            .fetch_all(&self.pool)
            .await
            .context("listing catalog")?;

        rows.into_iter().map(row_to_status).collect()
    }

    pub async fn delete(&self, file_path: &str) -> Result<()> {
        sqlx::query("DELETE FROM index_status WHERE file_path = ?")
            .bind(file_path)
            .execute(&self.pool)
            .await
            .with_context(|| format!("deleting status for {file_path}"))?;

        debug!(path = file_path, "deleted status");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn row_to_status(row: sqlx::sqlite::SqliteRow) -> Result<IndexStatus> {
    let status: String = row.get("status");
    let indexed_at: Option<String> = row.get("indexed_at");
    let last_modified: String = row.get("last_modified");

    Ok(IndexStatus {
        file_path: row.get("file_path"),
        file_hash: row.get("file_hash"),
        status: IndexState::parse(&status)?,
        indexed_at: indexed_at
            .map(|raw| {
                DateTime::parse_from_rfc3339(&raw)
                    .map(|t| t.with_timezone(&Utc))
                    .context("parsing indexed_at")
            })
            .transpose()?,
        error_message: row.get("error_message"),
        file_size: row.get("file_size"),
        last_modified: DateTime::parse_from_rfc3339(&last_modified)
            .context("parsing last_modified")?
            .with_timezone(&Utc),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn meta(path: &str, hash: &str, mtime_offset_secs: i64) -> FileMetadata {
        FileMetadata {
            path: path.to_string(),
            hash: hash.to_string(),
            size: 42,
            last_modified: Utc::now() + chrono::Duration::seconds(mtime_offset_secs),
            name: path.rsplit('/').next().unwrap_or(path).to_string(),
        }
    }

    async fn open_catalog(dir: &TempDir) -> IndexStatusCatalog {
        IndexStatusCatalog::open(&dir.path().join("nested/dir/status.db"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn upsert_then_get_roundtrips() {
        let dir = TempDir::new().unwrap();
        let catalog = open_catalog(&dir).await;

        let status = IndexStatus::pending(&meta("a.pdf", "h1", 0));
        catalog.upsert(&status).await.unwrap();

        let loaded = catalog.get("a.pdf").await.unwrap().unwrap();
        assert_eq!(loaded.file_hash, "h1");
        assert_eq!(loaded.status, IndexState::Pending);
        assert!(loaded.indexed_at.is_none());
        assert!(loaded.error_message.is_none());
    }

    #[tokio::test]
    async fn upsert_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let catalog = open_catalog(&dir).await;

        let status = IndexStatus::pending(&meta("a.pdf", "h1", 0));
        catalog.upsert(&status).await.unwrap();
        catalog.upsert(&status).await.unwrap();

        assert_eq!(catalog.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn update_field_claims_processing() {
        let dir = TempDir::new().unwrap();
        let catalog = open_catalog(&dir).await;

        catalog
            .upsert(&IndexStatus::pending(&meta("a.pdf", "h1", 0)))
            .await
            .unwrap();
        catalog
            .update_field("a.pdf", FieldUpdate::Status(IndexState::Processing))
            .await
            .unwrap();

        let loaded = catalog.get("a.pdf").await.unwrap().unwrap();
        assert_eq!(loaded.status, IndexState::Processing);
        // The claim only touches the status column.
        assert!(loaded.indexed_at.is_none());
        assert_eq!(loaded.file_hash, "h1");
    }

    #[tokio::test]
    async fn terminal_states_uphold_invariants() {
        let dir = TempDir::new().unwrap();
        let catalog = open_catalog(&dir).await;

        let pending = IndexStatus::pending(&meta("a.pdf", "h1", 0));
        catalog.upsert(&pending.clone().indexed()).await.unwrap();
        let loaded = catalog.get("a.pdf").await.unwrap().unwrap();
        assert_eq!(loaded.status, IndexState::Indexed);
        assert!(loaded.indexed_at.is_some());
        assert!(loaded.error_message.is_none());

        catalog
            .upsert(&pending.failed("parser exploded"))
            .await
            .unwrap();
        let loaded = catalog.get("a.pdf").await.unwrap().unwrap();
        assert_eq!(loaded.status, IndexState::Failed);
        assert!(loaded.indexed_at.is_none());
        assert_eq!(loaded.error_message.as_deref(), Some("parser exploded"));
    }

    #[tokio::test]
    async fn list_orders_by_mtime_descending() {
        let dir = TempDir::new().unwrap();
        let catalog = open_catalog(&dir).await;

        catalog
            .upsert(&IndexStatus::pending(&meta("old.pdf", "h1", -100)))
            .await
            .unwrap();
        catalog
            .upsert(&IndexStatus::pending(&meta("new.pdf", "h2", 100)))
            .await
            .unwrap();

        let listed = catalog.list().await.unwrap();
        assert_eq!(listed[0].file_path, "new.pdf");
        assert_eq!(listed[1].file_path, "old.pdf");
    }

    #[tokio::test]
    async fn delete_removes_record() {
        let dir = TempDir::new().unwrap();
        let catalog = open_catalog(&dir).await;

        catalog
            .upsert(&IndexStatus::pending(&meta("a.pdf", "h1", 0)))
            .await
            .unwrap();
        catalog.delete("a.pdf").await.unwrap();

        assert!(catalog.get("a.pdf").await.unwrap().is_none());
    }
}
