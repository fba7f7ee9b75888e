//! Step domain model

use crate::core::{
    config::{FunctionConfig, StepConfig},
    error::ConfigError,
    state::StepState,
    value::Value,
};
use crate::expression::Template;

/// How a step got its name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameSource {
    /// Written by the author
    Explicit,
    /// Derived from the function reference
    Derived,
}

/// What a step invokes
#[derive(Debug, Clone, PartialEq)]
pub enum FunctionSpec {
    /// Dotted path into the operation catalog
    Path(String),
    /// `${...}` text resolving to a callable or to a dotted path
    Expression(String),
    /// A capability looked up on a receiver value
    Bound { object: Value, attribute: String },
}

impl FunctionSpec {
    fn from_config(index: usize, config: &FunctionConfig) -> Result<Self, ConfigError> {
        match config {
            FunctionConfig::Reference(reference) => {
                let reference = reference.trim();
                if reference.is_empty() {
                    return Err(ConfigError::InvalidStep {
                        index,
                        reason: "empty function reference".to_string(),
                    });
                }
                if reference.contains("${") {
                    Ok(FunctionSpec::Expression(reference.to_string()))
                } else {
                    Ok(FunctionSpec::Path(reference.to_string()))
                }
            }
            FunctionConfig::Bound { object, name } => Ok(FunctionSpec::Bound {
                object: Value::from_yaml(object)?,
                attribute: name.clone(),
            }),
        }
    }

    /// The function as written, for logs and error messages
    pub fn reference_text(&self) -> String {
        match self {
            FunctionSpec::Path(path) => path.clone(),
            FunctionSpec::Expression(text) => text.clone(),
            FunctionSpec::Bound { object, attribute } => {
                format!("{}.{}", object.render(), attribute)
            }
        }
    }

    /// Base name for a step that has none
    pub fn derived_name(&self) -> String {
        match self {
            FunctionSpec::Path(path) => path.clone(),
            FunctionSpec::Expression(text) => chain_name(text).unwrap_or_else(|| text.clone()),
            FunctionSpec::Bound { object, attribute } => {
                let receiver = match object {
                    Value::Str(text) => chain_name(text).unwrap_or_else(|| text.clone()),
                    _ => "object".to_string(),
                };
                format!("{}.{}", receiver, attribute)
            }
        }
    }
}

fn chain_name(text: &str) -> Option<String> {
    match Template::parse(text).ok()? {
        Template::Single(expr) => Some(expr.reference.chain_name()),
        _ => None,
    }
}

/// A single step in a pipeline
#[derive(Debug, Clone)]
pub struct Step {
    /// Unique step name
    pub name: String,

    pub name_source: NameSource,

    pub description: Option<String>,

    pub function: FunctionSpec,

    /// Unresolved `args`
    pub args: Option<Value>,

    /// Unresolved checkpoint path template
    pub save_progress: Option<Value>,

    /// Load an existing checkpoint instead of recomputing
    pub resume_from_saved: bool,

    /// Extra names the output is bound under
    pub aliases: Vec<String>,

    /// Runtime state
    pub state: StepState,
}

impl Step {
    /// Create a step from its parsed entry; derived names are not yet
    /// disambiguated
    pub fn from_config(index: usize, config: StepConfig) -> Result<Self, ConfigError> {
        let function = FunctionSpec::from_config(index, &config.function)?;
        let (name, name_source) = match config.name {
            Some(name) if !name.trim().is_empty() => (name, NameSource::Explicit),
            _ => (function.derived_name(), NameSource::Derived),
        };

        Ok(Step {
            name,
            name_source,
            description: config.description,
            function,
            args: config.args.as_ref().map(Value::from_yaml).transpose()?,
            save_progress: config.save_progress.as_ref().map(Value::from_yaml).transpose()?,
            resume_from_saved: config.resume_from_saved.unwrap_or(true),
            aliases: config.output.map(|o| o.into_vec()).unwrap_or_default(),
            state: StepState::Pending,
        })
    }

    /// The step's name followed by its aliases
    pub fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(self.aliases.iter().map(String::as_str))
    }
}
