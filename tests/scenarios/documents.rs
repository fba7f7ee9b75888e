//! Test: Documents - imports, merging and command-line variables

use crate::helpers::*;
use etl_pipeline::cli::commands::DocumentArgs;
use etl_pipeline::core::config::PipelineDocument;
use etl_pipeline::core::error::ConfigError;
use etl_pipeline::core::{Pipeline, Value};
use etl_pipeline::persistence::InMemoryCheckpointStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

/// Lay out a root document importing two others, by absolute path
fn layered_documents(dir: &Path) -> PathBuf {
    let common = write(
        dir,
        "common.yml",
        r#"
variables:
  region: north
  limit: 1
  shared: from-common
steps:
  - name: imported
    function: collections.list
    args: ["${var.shared}"]
"#,
    );
    let overrides = write(
        dir,
        "overrides.yaml",
        r#"
variables:
  limit: 2
  threshold: 0.5
"#,
    );
    write(
        dir,
        "pipeline.yml",
        &format!(
            r#"
imports:
  - {}
  - {}
variables:
  region: east
steps:
  - name: local
    function: collections.map
    args:
      region: "${{var.region}}"
      limit: "${{var.limit}}"
      shared: "${{var.shared}}"
      threshold: "${{var.threshold}}"
"#,
            common.display(),
            overrides.display()
        ),
    )
}

/// Root variables win over imports and a later import wins over an earlier one
#[tokio::test]
async fn test_variable_precedence_with_imports() {
    let dir = tempfile::tempdir().unwrap();
    let root = layered_documents(dir.path());

    let document = PipelineDocument::from_file(&root, &[]).unwrap();
    let mut pipeline = Pipeline::from_document(&document).unwrap();

    assert_eq!(pipeline.name, "pipeline");
    assert_eq!(pipeline.execution_order(), vec!["imported", "local"]);

    let (catalog, _log) = counting_catalog();
    let engine = engine(catalog, Arc::new(InMemoryCheckpointStore::new()));
    let context = engine.execute(&mut pipeline).await.unwrap();

    let local = context.output("local").unwrap().as_map().unwrap();
    assert_eq!(local["region"], Value::str("east"));
    assert_eq!(local["limit"], Value::Int(2));
    assert_eq!(local["shared"], Value::str("from-common"));
    assert_eq!(local["threshold"], Value::Float(0.5));
    assert_eq!(
        context.output("imported"),
        Some(&Value::List(vec![Value::str("from-common")]))
    );
}

/// `--var` beats every document layer and is parsed as a scalar
#[test]
fn test_command_line_variables_override() {
    let dir = tempfile::tempdir().unwrap();
    let root = layered_documents(dir.path());

    let args = DocumentArgs {
        file: root,
        imports: Vec::new(),
        vars: vec!["region=south".to_string(), "limit=10".to_string()],
    };
    let pipeline = Pipeline::from_document(&args.load().unwrap()).unwrap();

    assert_eq!(pipeline.variables["region"], Value::str("south"));
    assert_eq!(pipeline.variables["limit"], Value::Int(10));
    assert_eq!(pipeline.variables["shared"], Value::str("from-common"));
}

#[test]
fn test_malformed_command_line_variable() {
    let dir = tempfile::tempdir().unwrap();
    let root = layered_documents(dir.path());

    let args = DocumentArgs {
        file: root,
        imports: Vec::new(),
        vars: vec!["region".to_string()],
    };
    let err = args.load().unwrap_err();
    assert_eq!(
        err.to_string(),
        "Invalid command line for variable 'region' Expected format as varName=varValue"
    );
}

/// Extra imports from the command line are merged after the document's own
#[test]
fn test_extra_imports_appended() {
    let dir = tempfile::tempdir().unwrap();
    let root = layered_documents(dir.path());
    let late = write(
        dir.path(),
        "late.yml",
        "variables: {limit: 99}\nsteps: [{name: late, function: collections.list}]\n",
    );

    let document = PipelineDocument::from_file(&root, &[late]).unwrap();
    let pipeline = Pipeline::from_document(&document).unwrap();

    assert_eq!(pipeline.variables["limit"], Value::Int(99));
    assert_eq!(pipeline.execution_order(), vec!["imported", "late", "local"]);
}

/// A mapping in one layer and a list in another is a type mismatch
#[test]
fn test_import_type_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    let imported = write(dir.path(), "bad.yml", "variables: [a, b]\n");
    let root = write(
        dir.path(),
        "root.yml",
        &format!("imports: [{}]\nvariables: {{region: east}}\nsteps: []\n", imported.display()),
    );

    let err = PipelineDocument::from_file(&root, &[]).unwrap_err();
    assert!(matches!(
        err,
        ConfigError::TypeMismatch { ref property, .. } if property == "variables"
    ));
    assert!(err.to_string().starts_with("Type mismatch in imported YAML file."));
}

#[test]
fn test_import_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.yml");
    let b = dir.path().join("b.yml");
    std::fs::write(&a, format!("imports: [{}]\n", b.display())).unwrap();
    std::fs::write(&b, format!("imports: [{}]\n", a.display())).unwrap();

    assert!(matches!(
        PipelineDocument::from_file(&a, &[]),
        Err(ConfigError::ImportCycle(_))
    ));
}

#[test]
fn test_wrong_extension() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(dir.path(), "pipeline.json", "{}");
    assert!(matches!(
        PipelineDocument::from_file(&path, &[]),
        Err(ConfigError::Extension(_))
    ));
}
