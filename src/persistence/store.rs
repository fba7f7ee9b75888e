//! SQLite-based checkpoint store

use crate::core::error::CheckpointError;
use crate::core::value::Value;
use crate::persistence::{CheckpointRecord, CheckpointStore, CheckpointSummary};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::PathBuf;
use std::str::FromStr;

/// Checkpoints in a single SQLite table keyed by checkpoint path
pub struct SqliteCheckpointStore {
    pool: SqlitePool,
}

impl SqliteCheckpointStore {
    /// Open (or create) the database at `db_path`; `:memory:` is supported
    pub async fn new(db_path: &str) -> Result<Self> {
        let connected = if db_path == ":memory:" {
            // Every pooled connection would get its own empty database
            SqlitePoolOptions::new()
                .max_connections(1)
                .connect("sqlite::memory:")
                .await
        } else {
            let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path))
                .context("Invalid database path")?
                .create_if_missing(true);
            SqlitePoolOptions::new().connect_with(options).await
        };
        let pool = connected.context("Failed to connect to database")?;

        let store = Self { pool };
        store.init().await?;

        Ok(store)
    }

    /// Create store with default path
    pub async fn with_default_path() -> Result<Self> {
        let db_path = Self::default_path();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::new(&db_path.to_string_lossy()).await
    }

    /// `<data dir>/etl-pipeline/checkpoints.db`
    pub fn default_path() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("etl-pipeline")
            .join("checkpoints.db")
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS checkpoints (
                path TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                payload TEXT NOT NULL,
                saved_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_saved_at ON checkpoints(saved_at);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Every stored checkpoint, newest first
    pub async fn list(&self) -> Result<Vec<CheckpointSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT path, kind, saved_at
            FROM checkpoints
            ORDER BY saved_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list checkpoints")?;

        rows.iter()
            .map(|row| {
                let kind: String = row.get("kind");
                Ok(CheckpointSummary {
                    path: row.get("path"),
                    kind: serde_json::from_value(serde_json::Value::String(kind))
                        .context("Unknown value kind")?,
                    saved_at: Self::from_naive(row.get("saved_at")),
                })
            })
            .collect()
    }

    /// Remove a checkpoint; returns whether one existed
    pub async fn delete(&self, path: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM checkpoints WHERE path = ?1")
            .bind(path)
            .execute(&self.pool)
            .await
            .context("Failed to delete checkpoint")?;

        Ok(result.rows_affected() > 0)
    }

    fn to_naive(dt: DateTime<Utc>) -> NaiveDateTime {
        dt.naive_utc()
    }

    fn from_naive(dt: NaiveDateTime) -> DateTime<Utc> {
        DateTime::from_naive_utc_and_offset(dt, Utc)
    }
}

#[async_trait::async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn exists(&self, path: &str) -> Result<bool, CheckpointError> {
        let row = sqlx::query("SELECT 1 FROM checkpoints WHERE path = ?1")
            .bind(path)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CheckpointError::Read {
                path: path.to_string(),
                reason: e.to_string(),
            })?;

        Ok(row.is_some())
    }

    async fn load(&self, path: &str) -> Result<Value, CheckpointError> {
        let row = sqlx::query("SELECT payload FROM checkpoints WHERE path = ?1")
            .bind(path)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CheckpointError::Read {
                path: path.to_string(),
                reason: e.to_string(),
            })?
            .ok_or_else(|| CheckpointError::Read {
                path: path.to_string(),
                reason: "no such checkpoint".to_string(),
            })?;

        let payload: String = row.get("payload");
        Ok(CheckpointRecord::decode(path, &payload)?.value)
    }

    async fn save(&self, path: &str, value: &Value) -> Result<(), CheckpointError> {
        let record = CheckpointRecord::new(path, value)?;
        let payload = record.encode(path)?;

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO checkpoints (path, kind, payload, saved_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(path)
        .bind(record.kind.as_str())
        .bind(payload)
        .bind(Self::to_naive(record.saved_at))
        .execute(&self.pool)
        .await
        .map_err(|e| CheckpointError::Write {
            path: path.to_string(),
            reason: e.to_string(),
        })?;

        Ok(())
    }
}
