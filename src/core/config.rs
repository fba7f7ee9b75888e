//! Pipeline documents from YAML
//!
//! A document may import other documents. Imports are merged beneath the
//! importing document: mappings deep-merge with the later layer winning,
//! `steps` lists concatenate, and command-line variables override both.

use crate::core::error::ConfigError;
use indexmap::IndexMap;
use serde::Deserialize;
use serde_yaml::{Mapping, Value as Yaml};
use std::path::{Path, PathBuf};
use tracing::debug;

/// A fully merged pipeline document
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineDocument {
    /// Pipeline name (defaults to the file stem)
    #[serde(default)]
    pub name: Option<String>,

    /// Pipeline variables
    #[serde(default)]
    pub variables: IndexMap<String, Yaml>,

    /// Script handed to the script runner before the first step
    #[serde(default, alias = "pre-flight")]
    pub pre_flight: Option<PreflightConfig>,

    /// Named connection strings
    #[serde(default)]
    pub connections: IndexMap<String, Yaml>,

    /// Step entries, explicit or short-hand
    #[serde(default)]
    pub steps: Vec<Yaml>,

    /// File the document was loaded from
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PreflightConfig {
    pub script: String,
}

/// Explicit step entry
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StepConfig {
    /// Step name (derived from the function when absent)
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    pub function: FunctionConfig,

    /// Keyword mapping, positional list, or absent
    #[serde(default)]
    pub args: Option<Yaml>,

    /// Checkpoint path template
    #[serde(default)]
    pub save_progress: Option<Yaml>,

    #[serde(default)]
    pub resume_from_saved: Option<bool>,

    /// Extra names for the step output
    #[serde(default)]
    pub output: Option<OutputNames>,
}

/// The `function` of a step
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FunctionConfig {
    /// A dotted path or a `${...}` expression
    Reference(String),
    /// A capability looked up on a receiver value
    Bound { object: Yaml, name: String },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OutputNames {
    One(String),
    Many(Vec<String>),
}

impl OutputNames {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            OutputNames::One(name) => vec![name],
            OutputNames::Many(names) => names,
        }
    }
}

impl StepConfig {
    /// Parse one entry of the `steps` list
    pub fn parse(index: usize, raw: &Yaml) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidStep { index, reason };

        let mapping = raw
            .as_mapping()
            .ok_or_else(|| invalid(format!("expected a mapping but got {}", type_name(raw))))?;

        if mapping.contains_key("function") {
            return serde_yaml::from_value(raw.clone()).map_err(|e| invalid(e.to_string()));
        }

        // Short-hand: `- math.add: {a: 1, b: 2}`
        match mapping.iter().next() {
            Some((Yaml::String(function), args)) if mapping.len() == 1 => Ok(StepConfig {
                name: None,
                description: None,
                function: FunctionConfig::Reference(function.clone()),
                args: (!args.is_null()).then(|| args.clone()),
                save_progress: None,
                resume_from_saved: None,
                output: None,
            }),
            _ => Err(invalid(
                "expected a 'function' key or a single-key short-hand entry".to_string(),
            )),
        }
    }
}

impl PipelineDocument {
    /// Load a document and everything it imports
    ///
    /// `extra_imports` are merged after the document's own imports.
    pub fn from_file<P: AsRef<Path>>(path: P, extra_imports: &[PathBuf]) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut loader = Loader::default();
        let merged = loader.load_file(path, extra_imports)?;

        let mut document = Self::from_merged(merged, &path.display().to_string())?;
        document.source = Some(path.to_path_buf());
        Ok(document)
    }

    /// Parse a document from a YAML string; imports resolve against the
    /// working directory
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let mut loader = Loader::default();
        let root = parse_mapping(yaml, "<inline>")?;
        let merged = loader.merge_with_imports(root, &[])?;
        Self::from_merged(merged, "<inline>")
    }

    fn from_merged(merged: Mapping, origin: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_value(Yaml::Mapping(merged)).map_err(|source| ConfigError::Yaml {
            origin: origin.to_string(),
            source,
        })
    }

    /// Layer command-line variables over the document's own
    pub fn apply_overrides(&mut self, overrides: IndexMap<String, Yaml>) {
        for (key, value) in overrides {
            debug!(variable = %key, "Variable overridden from command line");
            self.variables.insert(key, value);
        }
    }

    /// Parse every step entry
    pub fn step_configs(&self) -> Result<Vec<StepConfig>, ConfigError> {
        self.steps
            .iter()
            .enumerate()
            .map(|(index, raw)| StepConfig::parse(index, raw))
            .collect()
    }
}

#[derive(Default)]
struct Loader {
    /// Files currently being loaded, for cycle detection
    stack: Vec<PathBuf>,
}

impl Loader {
    fn load_file(&mut self, path: &Path, extra_imports: &[PathBuf]) -> Result<Mapping, ConfigError> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yml") | Some("yaml") => {}
            _ => return Err(ConfigError::Extension(path.display().to_string())),
        }

        let key = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        if self.stack.contains(&key) {
            return Err(ConfigError::ImportCycle(path.display().to_string()));
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        debug!(path = %path.display(), "Loading pipeline document");

        let root = parse_mapping(&content, &path.display().to_string())?;
        self.stack.push(key);
        let merged = self.merge_with_imports(root, extra_imports);
        self.stack.pop();
        merged
    }

    fn merge_with_imports(
        &mut self,
        mut root: Mapping,
        extra_imports: &[PathBuf],
    ) -> Result<Mapping, ConfigError> {
        let mut imports: Vec<PathBuf> = match root.remove("imports") {
            None | Some(Yaml::Null) => Vec::new(),
            Some(Yaml::Sequence(items)) => items
                .iter()
                .map(|item| {
                    item.as_str().map(PathBuf::from).ok_or_else(|| {
                        ConfigError::Invalid("'imports' must be a list of file paths".to_string())
                    })
                })
                .collect::<Result<_, _>>()?,
            Some(other) => {
                return Err(ConfigError::TypeMismatch {
                    property: "imports".to_string(),
                    expected: "sequence",
                    found: type_name(&other),
                })
            }
        };
        imports.extend(extra_imports.iter().cloned());

        let mut merged = Mapping::new();
        for import in &imports {
            let layer = self.load_file(import, &[])?;
            merged = merge_layers(merged, layer)?;
        }
        merge_layers(merged, root)
    }
}

fn parse_mapping(content: &str, origin: &str) -> Result<Mapping, ConfigError> {
    let value: Yaml = serde_yaml::from_str(content).map_err(|source| ConfigError::Yaml {
        origin: origin.to_string(),
        source,
    })?;
    match value {
        Yaml::Null => Ok(Mapping::new()),
        Yaml::Mapping(mapping) => Ok(mapping),
        other => Err(ConfigError::Invalid(format!(
            "{} must be a mapping at the top level, got {}",
            origin,
            type_name(&other)
        ))),
    }
}

/// Merge `overlay` over `base`
///
/// Mappings merge recursively and `steps` sequences concatenate. Any other
/// value in `overlay` replaces the one in `base`, provided both have the
/// same shape.
pub fn merge_layers(base: Mapping, overlay: Mapping) -> Result<Mapping, ConfigError> {
    merge_mappings(base, overlay, None)
}

fn merge_mappings(
    mut base: Mapping,
    overlay: Mapping,
    parent: Option<&str>,
) -> Result<Mapping, ConfigError> {
    for (key, value) in overlay {
        let name = match &key {
            Yaml::String(s) => s.clone(),
            other => serde_yaml::to_string(other)
                .map(|s| s.trim().to_string())
                .unwrap_or_default(),
        };
        let property = match parent {
            Some(parent) => format!("{}.{}", parent, name),
            None => name,
        };

        let merged = match base.remove(&key) {
            None => value,
            Some(existing) => merge_values(existing, value, &property)?,
        };
        base.insert(key, merged);
    }
    Ok(base)
}

fn merge_values(base: Yaml, overlay: Yaml, property: &str) -> Result<Yaml, ConfigError> {
    match (base, overlay) {
        (base, Yaml::Null) => Ok(base),
        (Yaml::Null, overlay) => Ok(overlay),
        (Yaml::Mapping(base), Yaml::Mapping(overlay)) => {
            Ok(Yaml::Mapping(merge_mappings(base, overlay, Some(property))?))
        }
        (Yaml::Sequence(mut base), Yaml::Sequence(overlay)) => {
            if property == "steps" {
                base.extend(overlay);
                Ok(Yaml::Sequence(base))
            } else {
                Ok(Yaml::Sequence(overlay))
            }
        }
        (base, overlay)
            if base.is_mapping() != overlay.is_mapping()
                || base.is_sequence() != overlay.is_sequence() =>
        {
            Err(ConfigError::TypeMismatch {
                property: property.to_string(),
                expected: type_name(&base),
                found: type_name(&overlay),
            })
        }
        (_, overlay) => Ok(overlay),
    }
}

fn type_name(value: &Yaml) -> &'static str {
    match value {
        Yaml::Null => "null",
        Yaml::Bool(_) => "boolean",
        Yaml::Number(_) => "number",
        Yaml::String(_) => "string",
        Yaml::Sequence(_) => "sequence",
        Yaml::Mapping(_) => "mapping",
        Yaml::Tagged(_) => "tagged",
    }
}

/// Parse `--var NAME=VALUE` arguments
///
/// Values are read as YAML scalars, so `5` is a number and `true` a
/// boolean; anything else stays text.
pub fn parse_command_line_variables<S: AsRef<str>>(
    vars: &[S],
) -> Result<IndexMap<String, Yaml>, ConfigError> {
    let mut parsed = IndexMap::new();
    for var in vars {
        let var = var.as_ref();
        let (name, raw) = match var.split('=').collect::<Vec<_>>().as_slice() {
            [name, raw] if !name.trim().is_empty() => (name.trim().to_string(), *raw),
            _ => return Err(ConfigError::InvalidVariable(var.to_string())),
        };

        let value = match serde_yaml::from_str::<Yaml>(raw) {
            Ok(scalar @ (Yaml::Bool(_) | Yaml::Number(_) | Yaml::String(_))) => scalar,
            _ => Yaml::String(raw.to_string()),
        };
        parsed.insert(name, value);
    }
    Ok(parsed)
}
