//! Test: Failure handling - errors abort the run at the failing step

use crate::helpers::*;
use etl_pipeline::core::error::{FunctionResolutionError, PreflightError};
use etl_pipeline::core::{ExecutionStatus, Pipeline, PipelineError, StepState, Value, ValueKind};
use etl_pipeline::execution::ExecutionEngine;
use etl_pipeline::persistence::{CheckpointStore, InMemoryCheckpointStore};
use std::sync::Arc;

/// An operation error names the step, the function and the arguments
#[tokio::test]
async fn test_operation_error_stops_pipeline() {
    let yaml = r#"
steps:
  - name: before
    function: test.counter
    saveProgress: before.json
  - name: boom
    function: test.explode
    args: ["${steps['before'].output}", sales]
  - name: after
    function: test.counter
"#;
    let store = Arc::new(InMemoryCheckpointStore::new());
    let (catalog, log) = counting_catalog();
    let engine = engine(catalog, store.clone());

    let result = run_yaml(&engine, yaml).await;

    assert_eq!(
        result.error().to_string(),
        "Error executing step 'boom' (test.explode) with arguments [1,\"sales\"]: exploded"
    );
    assert_eq!(result.pipeline.state.status, ExecutionStatus::Failed);
    assert!(matches!(result.step_state("boom"), StepState::Failed { .. }));
    assert!(matches!(result.step_state("after"), StepState::Pending));
    assert_eq!(log.count("test.counter"), 1);

    // Checkpoints of earlier steps are already written
    assert_eq!(store.load("before.json").await.unwrap(), Value::Int(1));
}

/// A function expression that resolves to data is not callable
#[tokio::test]
async fn test_function_not_callable() {
    let yaml = r#"
variables:
  answer: 42
steps:
  - name: call
    function: "${var.answer}"
"#;
    let (catalog, _log) = counting_catalog();
    let engine = engine(catalog, Arc::new(InMemoryCheckpointStore::new()));

    let result = run_yaml(&engine, yaml).await;

    assert!(matches!(
        result.error(),
        PipelineError::FunctionResolution {
            source: FunctionResolutionError::NotCallable { .. },
            ..
        }
    ));
    assert_eq!(result.error().step(), Some("call"));
}

/// Bound lookups fail on values without the capability
#[tokio::test]
async fn test_bound_attribute_not_found() {
    let yaml = r#"
variables:
  count: 3
steps:
  - name: call
    function:
      object: "${var.count}"
      name: groupby
"#;
    let (catalog, _log) = counting_catalog();
    let engine = engine(catalog, Arc::new(InMemoryCheckpointStore::new()));

    let result = run_yaml(&engine, yaml).await;

    match result.error() {
        PipelineError::FunctionResolution {
            source: FunctionResolutionError::AttributeNotFound { attribute, kind },
            ..
        } => {
            assert_eq!(attribute, "groupby");
            assert_eq!(*kind, ValueKind::Int);
        }
        other => panic!("expected a function resolution error, got {:?}", other),
    }
}

/// A failing preflight script stops the run before any step
#[tokio::test]
async fn test_preflight_failure() {
    let yaml = r#"
preFlight:
  script: "echo not ready >&2; exit 7"
steps:
  - test.counter:
"#;
    let (catalog, log) = counting_catalog();
    let engine = ExecutionEngine::new(catalog, Arc::new(InMemoryCheckpointStore::new()));
    let mut pipeline = Pipeline::from_yaml(yaml).unwrap();

    let err = engine.execute(&mut pipeline).await.unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Preflight(PreflightError::Failed { code: 7, .. })
    ));
    assert!(err.to_string().starts_with("Failed to execute pre-flight script"));
    assert_eq!(log.total(), 0);
    assert!(pipeline.has_failed());
}

/// The preflight script runs once, before the first step
#[tokio::test]
async fn test_preflight_runs_first() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("ready");
    let yaml = format!(
        r#"
pre-flight:
  script: "touch {}"
steps:
  - test.counter:
"#,
        marker.display()
    );
    let (catalog, log) = counting_catalog();
    let engine = ExecutionEngine::new(catalog, Arc::new(InMemoryCheckpointStore::new()));
    let mut pipeline = Pipeline::from_yaml(&yaml).unwrap();

    engine.execute(&mut pipeline).await.unwrap();

    assert!(marker.exists());
    assert_eq!(log.count("test.counter"), 1);
}
