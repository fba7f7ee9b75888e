//! Test: References - `${...}` resolution across steps

use crate::helpers::*;
use etl_pipeline::core::error::ResolutionErrorKind;
use etl_pipeline::core::{OutputSource, Pipeline, PipelineError, Value};
use etl_pipeline::persistence::InMemoryCheckpointStore;
use std::sync::Arc;

fn memory_engine() -> (etl_pipeline::execution::ExecutionEngine, CallLog) {
    let (catalog, log) = counting_catalog();
    (engine(catalog, Arc::new(InMemoryCheckpointStore::new())), log)
}

/// A field that is exactly one reference keeps the value's type;
/// embedded references are rendered into text
#[tokio::test]
async fn test_native_values_and_interpolation() {
    let yaml = r#"
variables:
  limit: 5
  ratio: 0.25
  enabled: true
  tags: [a, b]
steps:
  - name: echo
    function: test.echo
    args:
      limit: "${var.limit}"
      ratio: "${var.ratio}"
      enabled: "${var.enabled}"
      tags: "${var.tags}"
      label: "top-${var.limit}"
      nested: {inner: ["${var.tags[1]}", "${ var.limit }"]}
"#;
    let (engine, _log) = memory_engine();
    let result = run_yaml(&engine, yaml).await;
    assert_pipeline_completed(&result);

    let echo = result.output("echo").unwrap().as_map().unwrap();
    assert_eq!(echo["limit"], Value::Int(5));
    assert_eq!(echo["ratio"], Value::Float(0.25));
    assert_eq!(echo["enabled"], Value::Bool(true));
    assert_eq!(
        echo["tags"],
        Value::List(vec![Value::str("a"), Value::str("b")])
    );
    assert_eq!(echo["label"], Value::str("top-5"));
    assert_eq!(
        echo["nested"].as_map().unwrap()["inner"],
        Value::List(vec![Value::str("b"), Value::Int(5)])
    );
}

/// groupby then max, each step invoking a capability of the previous output
#[tokio::test]
async fn test_chained_table_operations() {
    let yaml = r#"
steps:
  - name: sales
    function: test.expensive
  - "${steps['sales'].output.groupby}": {by: region}
  - "${steps['sales.groupby'].output.max}":
  - name: shape
    function: collections.list
    args: ["${steps['sales.groupby.max'].output.shape}"]
"#;
    let (engine, _log) = memory_engine();
    let result = run_yaml(&engine, yaml).await;
    assert_pipeline_completed(&result);

    assert_eq!(
        result.pipeline.execution_order(),
        vec!["sales", "sales.groupby", "sales.groupby.max", "shape"]
    );

    let maxima = result.output("sales.groupby.max").unwrap().as_table().unwrap();
    assert_eq!(maxima.columns(), ["region", "amount"]);
    assert_eq!(
        maxima.rows(),
        [
            vec![Value::str("east"), Value::Int(10)],
            vec![Value::str("west"), Value::Int(7)],
        ]
    );
    assert_eq!(
        result.output("shape"),
        Some(&Value::List(vec![Value::List(vec![Value::Int(2), Value::Int(2)])]))
    );
}

/// Later steps can read an earlier step's resolved arguments
#[tokio::test]
async fn test_step_args_reference() {
    let yaml = r#"
variables:
  region: east
steps:
  - name: filter
    function: collections.map
    args: {region: "${var.region}", min: 3}
    output: [criteria]
  - name: summary
    function: text.format
    args:
      template: "{region} >= {min}"
      region: "${steps['criteria'].args.region}"
      min: "${steps['filter'].args['min']}"
"#;
    let (engine, _log) = memory_engine();
    let result = run_yaml(&engine, yaml).await;
    assert_pipeline_completed(&result);
    assert_eq!(result.output("summary"), Some(&Value::str("east >= 3")));
}

/// Table outputs can be read by column and by row
#[tokio::test]
async fn test_table_column_and_row_access() {
    let yaml = r#"
steps:
  - name: sales
    function: test.expensive
  - name: picked
    function: collections.map
    args:
      amounts: "${steps['sales'].output['amount']}"
      first: "${steps['sales'].output[0].region}"
      columns: "${steps['sales'].output.columns}"
"#;
    let (engine, _log) = memory_engine();
    let result = run_yaml(&engine, yaml).await;
    assert_pipeline_completed(&result);

    let picked = result.output("picked").unwrap().as_map().unwrap();
    assert_eq!(
        picked["amounts"],
        Value::List(vec![Value::Int(10), Value::Int(7), Value::Int(4)])
    );
    assert_eq!(picked["first"], Value::str("east"));
    assert_eq!(
        picked["columns"],
        Value::List(vec![Value::str("region"), Value::str("amount")])
    );
}

/// A reference to a later step is rejected before anything runs, so even
/// the steps ahead of it are not invoked or saved
#[tokio::test]
async fn test_forward_reference_rejected() {
    let yaml = r#"
steps:
  - name: first
    function: test.counter
    saveProgress: first.json
  - name: early
    function: test.echo
    args: ["${steps['late'].output}"]
  - name: late
    function: test.counter
"#;
    let store = Arc::new(InMemoryCheckpointStore::new());
    let (catalog, log) = counting_catalog();
    let engine = engine(catalog, store.clone());

    match try_run_yaml(&engine, yaml).await {
        Err(PipelineError::Resolution(e)) => {
            assert_eq!(e.kind, ResolutionErrorKind::ForwardReference("late".to_string()));
            assert_eq!(e.field, "steps[1].args[0]");
            assert_eq!(e.expression, "${steps['late'].output}");
        }
        Err(other) => panic!("expected a forward reference error, got {:?}", other),
        Ok(result) => panic!("pipeline '{}' should not have run", result.pipeline.name),
    }
    assert_eq!(log.total(), 0);
    assert_eq!(store.save_count(), 0);
}

/// A step cannot refer to itself either
#[test]
fn test_self_reference_rejected() {
    let yaml = r#"
steps:
  - name: loop
    function: test.echo
    args: ["${steps['loop'].output}"]
"#;
    assert!(matches!(
        Pipeline::from_yaml(yaml),
        Err(PipelineError::Resolution(ref e))
            if e.kind == ResolutionErrorKind::ForwardReference("loop".to_string())
    ));
}

#[test]
fn test_unknown_names_rejected() {
    let unknown_variable = "steps: [{test.echo: ['${var.missing}']}]";
    assert!(matches!(
        Pipeline::from_yaml(unknown_variable),
        Err(PipelineError::Resolution(ref e))
            if e.kind == ResolutionErrorKind::UnknownVariable("missing".to_string())
    ));

    let unknown_step = "steps: [{test.echo: [\"${steps['ghost'].output}\"]}]";
    assert!(matches!(
        Pipeline::from_yaml(unknown_step),
        Err(PipelineError::Resolution(ref e))
            if e.kind == ResolutionErrorKind::UnknownStep("ghost".to_string())
    ));

    let unknown_connection = "steps: [{test.echo: ['${conn.nope}']}]";
    assert!(matches!(
        Pipeline::from_yaml(unknown_connection),
        Err(PipelineError::Resolution(ref e))
            if e.kind == ResolutionErrorKind::UnknownConnection("nope".to_string())
    ));
}

/// Attribute errors surface when the step runs, naming the field
#[tokio::test]
async fn test_runtime_attribute_error() {
    let yaml = r#"
steps:
  - name: sales
    function: test.expensive
  - name: broken
    function: test.echo
    args: {x: "${steps['sales'].output.no_such_thing}"}
"#;
    let (engine, log) = memory_engine();
    let result = run_yaml(&engine, yaml).await;

    match result.error() {
        PipelineError::Resolution(e) => {
            assert_eq!(e.field, "steps[1].args.x");
            assert!(matches!(
                e.kind,
                ResolutionErrorKind::UnknownAttribute { ref attribute, .. } if attribute == "no_such_thing"
            ));
        }
        other => panic!("expected a resolution error, got {:?}", other),
    }
    assert_step_source(&result, "sales", OutputSource::Computed);
    assert_eq!(log.count("test.echo"), 0);
}
