//! Execution state models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Overall pipeline execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Pipeline has not started
    Pending,
    /// Pipeline is currently running
    Running,
    /// Every step completed
    Completed,
    /// A step or the preflight script failed
    Failed,
}

/// Where a completed step's output came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputSource {
    /// The operation was invoked
    Computed,
    /// Loaded from a checkpoint, operation skipped
    Restored,
}

/// State of a single step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StepState {
    Pending,
    Running {
        started_at: DateTime<Utc>,
    },
    Completed {
        source: OutputSource,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    },
    Failed {
        error: String,
        started_at: DateTime<Utc>,
        failed_at: DateTime<Utc>,
    },
}

/// Overall pipeline state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineState {
    /// Unique run ID
    pub run_id: Uuid,

    /// Current execution status
    pub status: ExecutionStatus,

    /// When execution started
    pub started_at: Option<DateTime<Utc>>,

    /// When execution completed/failed
    pub completed_at: Option<DateTime<Utc>>,

    /// Total number of steps
    pub total_steps: usize,

    /// Steps whose output was computed
    pub computed_steps: usize,

    /// Steps whose output was restored from a checkpoint
    pub restored_steps: usize,

    /// Number of failed steps
    pub failed_steps: usize,
}

impl PipelineState {
    /// Create a new pipeline state
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            status: ExecutionStatus::Pending,
            started_at: None,
            completed_at: None,
            total_steps: 0,
            computed_steps: 0,
            restored_steps: 0,
            failed_steps: 0,
        }
    }

    /// Mark pipeline as started
    pub fn start(&mut self, total_steps: usize) {
        self.status = ExecutionStatus::Running;
        self.started_at = Some(Utc::now());
        self.total_steps = total_steps;
    }

    /// Mark pipeline as completed
    pub fn complete(&mut self) {
        self.status = ExecutionStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    /// Mark pipeline as failed
    pub fn fail(&mut self) {
        self.status = ExecutionStatus::Failed;
        self.completed_at = Some(Utc::now());
    }

    pub fn record_completion(&mut self, source: OutputSource) {
        match source {
            OutputSource::Computed => self.computed_steps += 1,
            OutputSource::Restored => self.restored_steps += 1,
        }
    }

    pub fn completed_steps(&self) -> usize {
        self.computed_steps + self.restored_steps
    }
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::new()
    }
}
