//! Test: Checkpoint resume - skipping and recomputing saved steps

use crate::helpers::*;
use etl_pipeline::core::{OutputSource, PipelineError, Value};
use etl_pipeline::core::error::CheckpointError;
use etl_pipeline::persistence::{
    CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore,
};
use std::sync::Arc;

const RESUMABLE: &str = r#"
name: "Test: Resume"
steps:
  - name: load
    function: test.expensive
    saveProgress: checkpoints/load.json
  - "${steps['load'].output.groupby}": {by: region}
  - name: totals
    function: "${steps['load.groupby'].output.sum}"
"#;

/// The expensive step runs once across two runs sharing a store
#[tokio::test]
async fn test_resume_skips_saved_step() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileCheckpointStore::with_base_dir(dir.path()));
    let (catalog, log) = counting_catalog();
    let engine = engine(catalog, store);

    let first = run_yaml(&engine, RESUMABLE).await;
    assert_pipeline_completed(&first);
    assert_step_source(&first, "load", OutputSource::Computed);
    assert!(dir.path().join("checkpoints/load.json").exists());

    let second = run_yaml(&engine, RESUMABLE).await;
    assert_pipeline_completed(&second);
    assert_step_source(&second, "load", OutputSource::Restored);

    assert_eq!(log.count("test.expensive"), 1);
    assert_eq!(second.output("load"), first.output("load"));
    assert_eq!(second.output("totals"), first.output("totals"));
    assert_eq!(second.pipeline.state.restored_steps, 1);
    assert_eq!(second.pipeline.state.computed_steps, 2);
}

/// `resumeFromSaved: false` recomputes and overwrites every time
#[tokio::test]
async fn test_forced_recompute() {
    let yaml = r#"
steps:
  - name: tick
    function: test.counter
    saveProgress: tick.json
    resumeFromSaved: false
"#;
    let store = Arc::new(InMemoryCheckpointStore::new());
    let (catalog, log) = counting_catalog();
    let engine = engine(catalog, store.clone());

    for run in 1..=3 {
        let result = run_yaml(&engine, yaml).await;
        assert_pipeline_completed(&result);
        assert_step_source(&result, "tick", OutputSource::Computed);
        assert_eq!(result.output("tick"), Some(&Value::Int(run)));
        assert_eq!(store.load("tick.json").await.unwrap(), Value::Int(run));
    }

    assert_eq!(log.count("test.counter"), 3);
    assert_eq!(store.save_count(), 3);
}

/// A step without `saveProgress` never touches the store
#[tokio::test]
async fn test_no_checkpoint_without_save_progress() {
    let store = Arc::new(InMemoryCheckpointStore::new());
    let (catalog, log) = counting_catalog();
    let engine = engine(catalog, store.clone());

    for _ in 0..2 {
        assert_pipeline_completed(&run_yaml(&engine, "steps: [{test.counter: }]").await);
    }

    assert_eq!(log.count("test.counter"), 2);
    assert_eq!(store.save_count(), 0);
}

/// Checkpoint paths are templates over variables
#[tokio::test]
async fn test_checkpoint_path_from_variables() {
    let yaml = r#"
variables:
  run_date: 2024-01-31
  version: 3
  ratio: 2.0
steps:
  - name: load
    function: test.expensive
    saveProgress: "out/${var.run_date}/load-v${var.version}-r${var.ratio}.json"
"#;
    let store = Arc::new(InMemoryCheckpointStore::new());
    let (catalog, _log) = counting_catalog();
    let engine = engine(catalog, store.clone());

    assert_pipeline_completed(&run_yaml(&engine, yaml).await);
    assert!(store.exists("out/2024-01-31/load-v3-r2.0.json").await.unwrap());
}

/// A checkpoint that cannot be decoded fails the step instead of recomputing
#[tokio::test]
async fn test_malformed_checkpoint() {
    let store = Arc::new(InMemoryCheckpointStore::new());
    store.insert_raw("checkpoints/load.json", "{ not json").await;
    let (catalog, log) = counting_catalog();
    let engine = engine(catalog, store);

    let result = run_yaml(&engine, RESUMABLE).await;

    assert!(matches!(
        result.error(),
        PipelineError::Checkpoint {
            source: CheckpointError::Malformed { .. },
            ..
        }
    ));
    assert_eq!(result.error().step(), Some("load"));
    assert_eq!(log.total(), 0);
}

/// A record whose rows are narrower than its columns is rejected on restore,
/// before any later step can index into it
#[tokio::test]
async fn test_ragged_table_checkpoint() {
    let yaml = r#"
steps:
  - name: load
    function: test.expensive
    saveProgress: cp.json
  - name: amounts
    function: test.echo
    args: ["${steps['load'].output['amount']}"]
"#;
    let store = Arc::new(InMemoryCheckpointStore::new());
    store
        .insert_raw(
            "cp.json",
            r#"{"kind":"Table","saved_at":"2024-01-01T00:00:00Z",
                "value":{"Table":{"columns":["region","amount"],"rows":[[{"Str":"east"}]]}}}"#,
        )
        .await;
    let (catalog, log) = counting_catalog();
    let engine = engine(catalog, store);

    let result = run_yaml(&engine, yaml).await;

    assert!(matches!(
        result.error(),
        PipelineError::Checkpoint {
            source: CheckpointError::Malformed { .. },
            ..
        }
    ));
    assert_eq!(result.error().step(), Some("load"));
    assert_eq!(log.total(), 0);
}

/// Restored outputs can be used by later steps just like computed ones
#[cfg(feature = "sqlite")]
#[tokio::test]
async fn test_resume_with_sqlite_store() {
    use etl_pipeline::persistence::SqliteCheckpointStore;

    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("checkpoints.db");
    let (catalog, log) = counting_catalog();

    for _ in 0..2 {
        let store = Arc::new(SqliteCheckpointStore::new(&db.to_string_lossy()).await.unwrap());
        let engine = engine(catalog.clone(), store);
        let result = run_yaml(&engine, RESUMABLE).await;
        assert_pipeline_completed(&result);
    }

    assert_eq!(log.count("test.expensive"), 1);

    let store = SqliteCheckpointStore::new(&db.to_string_lossy()).await.unwrap();
    let listed = store.list().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].path, "checkpoints/load.json");
}
