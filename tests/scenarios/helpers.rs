//! Test utility functions for etl-pipeline scenarios

use etl_pipeline::catalog::{standard_catalog, CallArgs, OperationCatalog};
use etl_pipeline::core::error::{OperationError, PreflightError};
use etl_pipeline::core::{
    ExecutionContext, ExecutionStatus, OutputSource, Pipeline, PipelineError, StepState, Value,
};
use etl_pipeline::execution::{ExecutionEngine, ScriptRunner};
use etl_pipeline::persistence::CheckpointStore;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Counts invocations per operation path
#[derive(Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<HashMap<String, usize>>>,
}

impl CallLog {
    fn record(&self, path: &str) -> usize {
        let mut calls = self.calls.lock().unwrap();
        let count = calls.entry(path.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn count(&self, path: &str) -> usize {
        self.calls.lock().unwrap().get(path).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

/// The standard catalog plus a few operations that record their calls
///
/// - `test.expensive` returns a small sales table
/// - `test.counter` returns how often it has been called
/// - `test.echo` returns its arguments unchanged
/// - `test.explode` always fails
pub fn counting_catalog() -> (Arc<OperationCatalog>, CallLog) {
    let log = CallLog::default();
    let mut catalog = standard_catalog();

    let expensive = log.clone();
    catalog.register_function("test.expensive", move |_args| {
        expensive.record("test.expensive");
        Ok(sales_table())
    });

    let counter = log.clone();
    catalog.register_function("test.counter", move |_args| {
        Ok(Value::Int(counter.record("test.counter") as i64))
    });

    let echo = log.clone();
    catalog.register_function("test.echo", move |args: CallArgs| {
        echo.record("test.echo");
        Ok(args.to_value())
    });

    let explode = log.clone();
    catalog.register_function("test.explode", move |_args| {
        explode.record("test.explode");
        Err(OperationError::Failed("exploded".to_string()))
    });

    (Arc::new(catalog), log)
}

pub fn sales_table() -> Value {
    let yaml = r#"
- {region: east, amount: 10}
- {region: west, amount: 7}
- {region: east, amount: 4}
"#;
    let records = Value::from_yaml(&serde_yaml::from_str(yaml).unwrap()).unwrap();
    let records = records.as_list().unwrap().to_vec();
    Value::Table(etl_pipeline::core::Table::from_records(&records).unwrap())
}

/// Preflight runner that never runs anything
pub struct NoopScriptRunner;

#[async_trait]
impl ScriptRunner for NoopScriptRunner {
    async fn run(&self, _script: &str) -> Result<(), PreflightError> {
        Ok(())
    }
}

/// Outcome of one run
pub struct PipelineTestResult {
    pub pipeline: Pipeline,
    pub result: Result<ExecutionContext, PipelineError>,
}

impl PipelineTestResult {
    /// Check if the pipeline completed successfully
    pub fn is_success(&self) -> bool {
        self.result.is_ok() && self.pipeline.state.status == ExecutionStatus::Completed
    }

    /// Output of a step, by name or alias
    pub fn output(&self, step: &str) -> Option<&Value> {
        self.result.as_ref().ok().and_then(|context| context.output(step))
    }

    pub fn error(&self) -> &PipelineError {
        match &self.result {
            Err(e) => e,
            Ok(_) => panic!("pipeline '{}' should have failed", self.pipeline.name),
        }
    }

    /// Get the state of a specific step
    pub fn step_state(&self, step: &str) -> &StepState {
        &self
            .pipeline
            .step(step)
            .unwrap_or_else(|| panic!("Step '{}' not found", step))
            .state
    }
}

/// Build an engine around `catalog` and `store` with preflight disabled
pub fn engine(catalog: Arc<OperationCatalog>, store: Arc<dyn CheckpointStore>) -> ExecutionEngine {
    ExecutionEngine::new(catalog, store).with_script_runner(Arc::new(NoopScriptRunner))
}

/// Parse, validate and run a pipeline
pub async fn run_yaml(engine: &ExecutionEngine, yaml: &str) -> PipelineTestResult {
    try_run_yaml(engine, yaml)
        .await
        .expect("pipeline should be valid")
}

/// Like `run_yaml`, but a pipeline that fails validation is returned as an
/// error instead of panicking
pub async fn try_run_yaml(
    engine: &ExecutionEngine,
    yaml: &str,
) -> Result<PipelineTestResult, PipelineError> {
    let mut pipeline = Pipeline::from_yaml(yaml)?;
    let result = engine.execute(&mut pipeline).await;
    Ok(PipelineTestResult { pipeline, result })
}

/// Assert a pipeline ran to completion
pub fn assert_pipeline_completed(result: &PipelineTestResult) {
    assert!(
        result.is_success(),
        "pipeline should have completed, got {:?}",
        result.result.as_ref().err()
    );
}

/// Assert where a completed step's output came from
pub fn assert_step_source(result: &PipelineTestResult, step: &str, expected: OutputSource) {
    match result.step_state(step) {
        StepState::Completed { source, .. } => assert_eq!(
            *source, expected,
            "step '{}' output source mismatch",
            step
        ),
        other => panic!("step '{}' should be completed, was {:?}", step, other),
    }
}
