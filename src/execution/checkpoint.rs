//! Checkpoint manager - decides whether a step is computed or restored

use crate::core::error::CheckpointError;
use crate::core::value::Value;
use crate::persistence::CheckpointStore;
use std::sync::Arc;

/// What to do with a step given its checkpoint settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointDecision {
    /// No checkpoint path: just invoke
    Compute,
    /// Load the saved output and skip invocation
    Restore,
    /// Invoke, then write the output; `overwrite` when resuming is disabled
    /// and a record is already stored at the path
    ComputeAndSave { overwrite: bool },
}

/// Decide from the resolved path, the resume flag and whether a record exists
pub fn decide(path: Option<&str>, resume: bool, exists: bool) -> CheckpointDecision {
    match (path, resume, exists) {
        (None, _, _) => CheckpointDecision::Compute,
        (Some(_), true, true) => CheckpointDecision::Restore,
        (Some(_), false, exists) => CheckpointDecision::ComputeAndSave { overwrite: exists },
        (Some(_), true, false) => CheckpointDecision::ComputeAndSave { overwrite: false },
    }
}

/// Applies checkpoint decisions against a store
#[derive(Clone)]
pub struct CheckpointManager {
    store: Arc<dyn CheckpointStore>,
}

impl CheckpointManager {
    pub fn new(store: Arc<dyn CheckpointStore>) -> Self {
        Self { store }
    }

    /// Consult the store only when the step has a checkpoint path
    pub async fn plan(
        &self,
        path: Option<&str>,
        resume: bool,
    ) -> Result<CheckpointDecision, CheckpointError> {
        let exists = match path {
            Some(path) => self.store.exists(path).await?,
            None => false,
        };
        Ok(decide(path, resume, exists))
    }

    pub async fn restore(&self, path: &str) -> Result<Value, CheckpointError> {
        self.store.load(path).await
    }

    pub async fn persist(&self, path: &str, value: &Value) -> Result<(), CheckpointError> {
        self.store.save(path, value).await
    }
}
