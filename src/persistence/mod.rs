//! Checkpoint persistence
//!
//! A checkpoint is the output of one step, saved under the path its
//! `saveProgress` template resolved to. Records are JSON and carry the
//! value kind and the time they were written.

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteCheckpointStore;

use crate::core::error::CheckpointError;
use crate::core::value::{Value, ValueKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// A persisted step output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub kind: ValueKind,
    pub saved_at: DateTime<Utc>,
    pub value: Value,
}

impl CheckpointRecord {
    /// Wrap a value; connections and callables have no persisted form
    pub fn new(path: &str, value: &Value) -> Result<Self, CheckpointError> {
        if let Some(kind) = value.find_opaque() {
            return Err(CheckpointError::Unencodable {
                path: path.to_string(),
                kind,
            });
        }
        Ok(Self {
            kind: value.kind(),
            saved_at: Utc::now(),
            value: value.clone(),
        })
    }

    pub fn encode(&self, path: &str) -> Result<String, CheckpointError> {
        serde_json::to_string_pretty(self).map_err(|e| CheckpointError::Write {
            path: path.to_string(),
            reason: e.to_string(),
        })
    }

    pub fn decode(path: &str, text: &str) -> Result<Self, CheckpointError> {
        serde_json::from_str(text).map_err(|e| CheckpointError::Malformed {
            path: path.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Listing entry for stored checkpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointSummary {
    pub path: String,
    pub kind: ValueKind,
    pub saved_at: DateTime<Utc>,
}

/// Trait for checkpoint backends
#[async_trait::async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Whether a record exists at `path`
    async fn exists(&self, path: &str) -> Result<bool, CheckpointError>;

    /// Load the value saved at `path`
    async fn load(&self, path: &str) -> Result<Value, CheckpointError>;

    /// Create or replace the record at `path`
    async fn save(&self, path: &str, value: &Value) -> Result<(), CheckpointError>;
}

/// In-memory checkpoints (for testing or ephemeral use)
pub struct InMemoryCheckpointStore {
    records: tokio::sync::RwLock<HashMap<String, String>>,
    saves: AtomicUsize,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self {
            records: tokio::sync::RwLock::new(HashMap::new()),
            saves: AtomicUsize::new(0),
        }
    }

    /// Number of successful saves since creation
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Store raw record text, bypassing encoding
    pub async fn insert_raw(&self, path: &str, text: &str) {
        self.records
            .write()
            .await
            .insert(path.to_string(), text.to_string());
    }

    pub async fn list(&self) -> Result<Vec<CheckpointSummary>, CheckpointError> {
        let records = self.records.read().await;
        let mut summaries = records
            .iter()
            .map(|(path, text)| {
                CheckpointRecord::decode(path, text).map(|record| CheckpointSummary {
                    path: path.clone(),
                    kind: record.kind,
                    saved_at: record.saved_at,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        summaries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(summaries)
    }
}

impl Default for InMemoryCheckpointStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn exists(&self, path: &str) -> Result<bool, CheckpointError> {
        Ok(self.records.read().await.contains_key(path))
    }

    async fn load(&self, path: &str) -> Result<Value, CheckpointError> {
        let records = self.records.read().await;
        let text = records.get(path).ok_or_else(|| CheckpointError::Read {
            path: path.to_string(),
            reason: "no such checkpoint".to_string(),
        })?;
        Ok(CheckpointRecord::decode(path, text)?.value)
    }

    async fn save(&self, path: &str, value: &Value) -> Result<(), CheckpointError> {
        let text = CheckpointRecord::new(path, value)?.encode(path)?;
        self.records.write().await.insert(path.to_string(), text);
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// One JSON file per checkpoint, at the checkpoint path
#[derive(Debug, Clone, Default)]
pub struct FileCheckpointStore {
    /// Relative checkpoint paths resolve against this directory
    base_dir: Option<PathBuf>,
}

impl FileCheckpointStore {
    /// Store resolving relative paths against the working directory
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: Some(base_dir.into()),
        }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }
}

#[async_trait::async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn exists(&self, path: &str) -> Result<bool, CheckpointError> {
        tokio::fs::try_exists(self.resolve(path))
            .await
            .map_err(|e| CheckpointError::Read {
                path: path.to_string(),
                reason: e.to_string(),
            })
    }

    async fn load(&self, path: &str) -> Result<Value, CheckpointError> {
        let file = self.resolve(path);
        let text = tokio::fs::read_to_string(&file)
            .await
            .map_err(|e| CheckpointError::Read {
                path: path.to_string(),
                reason: e.to_string(),
            })?;
        debug!(path = %file.display(), "Loaded checkpoint");
        Ok(CheckpointRecord::decode(path, &text)?.value)
    }

    async fn save(&self, path: &str, value: &Value) -> Result<(), CheckpointError> {
        let text = CheckpointRecord::new(path, value)?.encode(path)?;
        let file = self.resolve(path);
        let write_error = |e: std::io::Error| CheckpointError::Write {
            path: path.to_string(),
            reason: e.to_string(),
        };

        if let Some(parent) = file.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(write_error)?;
        }
        tokio::fs::write(&file, text).await.map_err(write_error)?;
        debug!(path = %file.display(), "Saved checkpoint");
        Ok(())
    }
}
