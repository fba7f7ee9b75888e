//! Test: Step naming - explicit, derived and aliased names

use crate::helpers::*;
use etl_pipeline::core::error::NamingError;
use etl_pipeline::core::{NameSource, PipelineError, Value};
use etl_pipeline::persistence::InMemoryCheckpointStore;
use std::sync::Arc;

/// Duplicate names fail validation, so nothing is invoked or saved
#[tokio::test]
async fn test_duplicate_names_rejected() {
    let yaml = r#"
steps:
  - name: A
    function: test.counter
    saveProgress: a.json
  - name: B
    function: test.counter
    output: A
"#;
    let store = Arc::new(InMemoryCheckpointStore::new());
    let (catalog, log) = counting_catalog();
    let engine = engine(catalog, store.clone());

    match try_run_yaml(&engine, yaml).await {
        Err(PipelineError::Naming(NamingError::Duplicate { name, first, second })) => {
            assert_eq!(name, "A");
            assert_eq!((first, second), (0, 1));
        }
        Err(other) => panic!("expected a duplicate name error, got {:?}", other),
        Ok(result) => panic!("pipeline '{}' should not have run", result.pipeline.name),
    }
    assert_eq!(log.total(), 0);
    assert_eq!(store.save_count(), 0);
}

/// Repeated short-hand steps get numbered names
#[tokio::test]
async fn test_derived_names_disambiguated() {
    let yaml = r#"
steps:
  - test.counter:
  - test.counter:
  - test.counter:
  - name: last
    function: collections.list
    args:
      - "${steps['test.counter'].output}"
      - "${steps['test.counter#2'].output}"
      - "${steps['test.counter#3'].output}"
"#;
    let (catalog, log) = counting_catalog();
    let engine = engine(catalog, Arc::new(InMemoryCheckpointStore::new()));

    let result = run_yaml(&engine, yaml).await;
    assert_pipeline_completed(&result);

    assert_eq!(
        result.pipeline.execution_order(),
        vec!["test.counter", "test.counter#2", "test.counter#3", "last"]
    );
    assert_eq!(
        result.output("last"),
        Some(&Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)]))
    );
    assert_eq!(log.count("test.counter"), 3);
    assert!(result
        .pipeline
        .steps
        .iter()
        .take(3)
        .all(|s| s.name_source == NameSource::Derived));
}

/// A derived name that matches a name the author chose is suffixed instead
#[tokio::test]
async fn test_derived_name_yields_to_explicit() {
    let yaml = r#"
steps:
  - math.add: [1, 2]
  - name: math.add
    function: collections.list
    args: ["${steps['math.add#2'].output}"]
"#;
    let (catalog, _log) = counting_catalog();
    let engine = engine(catalog, Arc::new(InMemoryCheckpointStore::new()));

    let result = run_yaml(&engine, yaml).await;
    assert_pipeline_completed(&result);

    assert_eq!(result.pipeline.execution_order(), vec!["math.add#2", "math.add"]);
    assert_eq!(result.output("math.add#2"), Some(&Value::Int(3)));
    assert_eq!(
        result.output("math.add"),
        Some(&Value::List(vec![Value::Int(3)]))
    );
}

/// Short-hand with an empty value is a zero-argument call
#[tokio::test]
async fn test_shorthand_without_args() {
    let yaml = r#"
steps:
  - collections.list:
  - collections.map: {}
"#;
    let (catalog, _log) = counting_catalog();
    let engine = engine(catalog, Arc::new(InMemoryCheckpointStore::new()));

    let result = run_yaml(&engine, yaml).await;
    assert_pipeline_completed(&result);
    assert_eq!(result.output("collections.list"), Some(&Value::List(Vec::new())));
    assert_eq!(
        result.output("collections.map"),
        Some(&Value::Map(Default::default()))
    );
}

/// Aliases expose the same output under several names
#[tokio::test]
async fn test_output_aliases() {
    let yaml = r#"
steps:
  - name: load
    function: test.expensive
    output: [sales, raw]
  - name: rows
    function: collections.list
    args: ["${steps['sales'].output.len}", "${steps['raw'].output.len}"]
"#;
    let (catalog, log) = counting_catalog();
    let engine = engine(catalog, Arc::new(InMemoryCheckpointStore::new()));

    let result = run_yaml(&engine, yaml).await;
    assert_pipeline_completed(&result);

    assert_eq!(result.output("sales"), result.output("load"));
    assert_eq!(result.output("raw"), result.output("load"));
    assert_eq!(
        result.output("rows"),
        Some(&Value::List(vec![Value::Int(3), Value::Int(3)]))
    );
    assert_eq!(log.count("test.expensive"), 1);
}
