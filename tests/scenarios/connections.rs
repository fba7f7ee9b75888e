//! Test: Connections - lazy construction and reuse across steps

use crate::helpers::*;
use etl_pipeline::catalog::BuiltinConnectionFactory;
use etl_pipeline::core::error::{ConnectionError, ResolutionErrorKind};
use etl_pipeline::core::{ConnectionFactory, ConnectionHandle, Pipeline, PipelineError, Value};
use etl_pipeline::persistence::InMemoryCheckpointStore;
use std::sync::{Arc, Mutex};

/// Wraps the builtin factory and remembers every URL it was asked to open
#[derive(Default)]
struct RecordingFactory {
    inner: BuiltinConnectionFactory,
    opened: Mutex<Vec<String>>,
}

impl RecordingFactory {
    fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }
}

impl ConnectionFactory for RecordingFactory {
    fn connect(&self, name: &str, url: &str) -> Result<ConnectionHandle, ConnectionError> {
        self.opened.lock().unwrap().push(url.to_string());
        self.inner.connect(name, url)
    }
}

const ROUND_TRIP: &str = r#"
variables:
  db_name: warehouse
connections:
  db: "memory://${var.db_name}"
  unused: "memory://elsewhere"
steps:
  - name: sales
    function: test.expensive
  - name: written
    function: "${steps['sales'].output.to_table}"
    args: {name: sales, con: "${conn.db}"}
  - name: reloaded
    function: db.read_table
    args: {name: sales, con: "${conn.db}"}
"#;

/// Each connection is opened once, on first reference, and shared after
#[tokio::test]
async fn test_connection_opened_once() {
    let factory = Arc::new(RecordingFactory::default());
    let (catalog, _log) = counting_catalog();
    let engine = engine(catalog, Arc::new(InMemoryCheckpointStore::new()))
        .with_connection_factory(factory.clone());

    let result = run_yaml(&engine, ROUND_TRIP).await;

    assert_pipeline_completed(&result);
    assert_eq!(factory.opened(), vec!["memory://warehouse".to_string()]);
    assert_eq!(result.output("written"), Some(&Value::Int(3)));
    assert_eq!(result.output("reloaded"), Some(&sales_table()));

    let context = result.result.as_ref().unwrap();
    assert_eq!(context.connections().opened(), 1);
}

/// A connection nobody references is never built, even if it could not be
#[tokio::test]
async fn test_unreferenced_connection_not_built() {
    let yaml = r#"
connections:
  broken: "postgres://nowhere"
steps:
  - test.counter:
"#;
    let (catalog, log) = counting_catalog();
    let engine = engine(catalog, Arc::new(InMemoryCheckpointStore::new()));

    let result = run_yaml(&engine, yaml).await;
    assert_pipeline_completed(&result);
    assert_eq!(log.count("test.counter"), 1);
}

/// Opening fails only when a step needs the connection
#[tokio::test]
async fn test_connection_failure_is_reported_at_use() {
    let yaml = r#"
connections:
  broken: "postgres://nowhere"
steps:
  - test.counter:
  - name: read
    function: db.read_table
    args: {name: sales, con: "${conn.broken}"}
"#;
    let (catalog, log) = counting_catalog();
    let engine = engine(catalog, Arc::new(InMemoryCheckpointStore::new()));

    let result = run_yaml(&engine, yaml).await;

    match result.error() {
        PipelineError::Resolution(e) => {
            assert_eq!(e.field, "steps[1].args.con");
            assert!(matches!(
                e.kind,
                ResolutionErrorKind::ConnectionFailed { ref name, .. } if name == "broken"
            ));
        }
        other => panic!("expected a resolution error, got {:?}", other),
    }
    assert_eq!(log.count("test.counter"), 1);
}

/// Connection strings may only use variables
#[test]
fn test_connection_cannot_reference_steps() {
    let yaml = r#"
connections:
  db: "memory://${steps['load'].output}"
steps:
  - name: load
    function: test.expensive
"#;
    match Pipeline::from_yaml(yaml) {
        Err(PipelineError::Resolution(e)) => {
            assert_eq!(e.field, "connections.db");
            assert!(matches!(e.kind, ResolutionErrorKind::InvalidExpression(_)));
        }
        other => panic!("expected a resolution error, got {:?}", other.map(|p| p.name)),
    }
}
