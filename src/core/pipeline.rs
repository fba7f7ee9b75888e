//! Pipeline domain model

use crate::core::{
    config::PipelineDocument,
    error::PipelineError,
    registry::{validate_connections, StepRegistry},
    state::{ExecutionStatus, PipelineState},
    step::Step,
    value::Value,
};
use indexmap::IndexMap;
use serde_yaml::Value as Yaml;
use std::collections::HashMap;

/// A validated pipeline, ready to run
#[derive(Debug, Clone)]
pub struct Pipeline {
    /// Pipeline name
    pub name: String,

    /// Variables, immutable once the run starts
    pub variables: IndexMap<String, Value>,

    /// Connection string templates by connection name
    pub connections: IndexMap<String, Value>,

    /// Script run once before the first step
    pub preflight: Option<String>,

    /// Steps in execution (document) order
    pub steps: Vec<Step>,

    /// Execution state
    pub state: PipelineState,

    positions: HashMap<String, usize>,
}

impl Pipeline {
    /// Build a pipeline from a merged document, validating names and
    /// references
    pub fn from_document(document: &PipelineDocument) -> Result<Self, PipelineError> {
        let variables = convert(&document.variables)?;
        let connections = convert(&document.connections)?;
        validate_connections(&connections, &variables)?;

        let steps = document
            .step_configs()?
            .into_iter()
            .enumerate()
            .map(|(index, config)| Step::from_config(index, config))
            .collect::<Result<Vec<_>, _>>()?;
        let (steps, positions) =
            StepRegistry::build(steps, &variables, &connections)?.into_parts();

        let name = document
            .name
            .clone()
            .or_else(|| {
                document
                    .source
                    .as_ref()
                    .and_then(|p| p.file_stem())
                    .map(|s| s.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| "pipeline".to_string());

        Ok(Pipeline {
            name,
            variables,
            connections,
            preflight: document.pre_flight.as_ref().map(|p| p.script.clone()),
            steps,
            state: PipelineState::new(),
            positions,
        })
    }

    /// Parse and validate a pipeline from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, PipelineError> {
        Self::from_document(&PipelineDocument::from_yaml(yaml)?)
    }

    /// Get a step by name or alias
    pub fn step(&self, name: &str) -> Option<&Step> {
        self.positions.get(name).map(|&i| &self.steps[i])
    }

    /// Step names in the order they run
    pub fn execution_order(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }

    /// Check if pipeline has failed
    pub fn has_failed(&self) -> bool {
        self.state.status == ExecutionStatus::Failed
    }
}

fn convert(map: &IndexMap<String, Yaml>) -> Result<IndexMap<String, Value>, PipelineError> {
    let mut converted = IndexMap::with_capacity(map.len());
    for (key, value) in map {
        converted.insert(key.clone(), Value::from_yaml(value)?);
    }
    Ok(converted)
}
