//! etl-pipeline - declarative YAML data pipelines
//!
//! A pipeline document lists steps that each call an operation from the
//! catalog. Arguments may reference variables, connections and the outputs
//! of earlier steps through `${...}` expressions, and any step can save its
//! output so that a rerun skips it.

pub mod catalog;
pub mod cli;
pub mod core;
pub mod execution;
pub mod expression;
pub mod persistence;

// Re-export commonly used types
pub use self::catalog::{standard_catalog, OperationCatalog};
pub use self::core::{ExecutionContext, ExecutionStatus, Pipeline, PipelineError, Step, StepState, Value};
pub use execution::{ExecutionEngine, ExecutionEvent};
pub use persistence::{CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore};
