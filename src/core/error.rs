//! Error taxonomy for loading, validating and running pipelines

use crate::core::value::ValueKind;
use thiserror::Error;

/// Malformed documents, unreadable files and bad command-line input
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid YAML in {origin}: {source}")]
    Yaml {
        origin: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Wrong file extension for {0}, expected .yml or .yaml")]
    Extension(String),

    #[error("Import cycle detected: {0} imports itself")]
    ImportCycle(String),

    #[error(
        "Type mismatch in imported YAML file. Expected for property '{property}' type '{expected}' but got type '{found}'"
    )]
    TypeMismatch {
        property: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("Invalid command line for variable '{0}' Expected format as varName=varValue")]
    InvalidVariable(String),

    #[error("Invalid step at position {index}: {reason}")]
    InvalidStep { index: usize, reason: String },

    #[error("Invalid document: {0}")]
    Invalid(String),
}

/// Step identity violations, detected before anything runs
#[derive(Debug, Error)]
pub enum NamingError {
    #[error("Duplicate step name '{name}' (steps {first} and {second})")]
    Duplicate {
        name: String,
        first: usize,
        second: usize,
    },

    #[error("Derived step name '{name}' of step {index} has no free '#k' suffix")]
    DerivedCollision { name: String, index: usize },
}

/// A `${...}` reference that could not be resolved
#[derive(Debug, Error)]
#[error("{kind} in '{expression}' at {field}")]
pub struct ResolutionError {
    /// The original expression text, including the `${ }` marker
    pub expression: String,

    /// Where in the document the expression appeared
    pub field: String,

    pub kind: ResolutionErrorKind,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResolutionErrorKind {
    #[error("unknown variable '{0}'")]
    UnknownVariable(String),

    #[error("unknown connection '{0}'")]
    UnknownConnection(String),

    #[error("unknown step '{0}'")]
    UnknownStep(String),

    #[error("step '{0}' is not available yet (forward reference)")]
    ForwardReference(String),

    #[error("no attribute '{attribute}' on {kind} value")]
    UnknownAttribute { attribute: String, kind: ValueKind },

    #[error("index {index} out of range for list of length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("invalid expression: {0}")]
    InvalidExpression(String),

    #[error("connection '{name}' could not be opened: {reason}")]
    ConnectionFailed { name: String, reason: String },

    #[error("expected text but got {0} value")]
    NotText(ValueKind),
}

/// The `function` field of a step does not name an invokable target
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FunctionResolutionError {
    #[error("no operation named '{path}' (unknown segment '{segment}')")]
    NameNotFound { path: String, segment: String },

    #[error("{kind} value has no capability '{attribute}'")]
    AttributeNotFound { attribute: String, kind: ValueKind },

    #[error("'{target}' is not callable")]
    NotCallable { target: String },
}

/// A connection factory could not build a handle
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("unsupported connection scheme '{0}'")]
    UnsupportedScheme(String),

    #[error("{0}")]
    Failed(String),
}

/// Errors raised by operations while they run
#[derive(Debug, Error)]
pub enum OperationError {
    #[error("missing required argument '{0}'")]
    MissingArgument(String),

    #[error("argument '{name}' expected {expected} but got {found}")]
    InvalidArgument {
        name: String,
        expected: &'static str,
        found: ValueKind,
    },

    #[error("unexpected argument '{0}'")]
    UnexpectedArgument(String),

    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// An invoked operation failed; carries enough context to find the step
#[derive(Debug, Error)]
#[error("Error executing step '{step}' ({function}) with arguments {args}: {source}")]
pub struct ExecutionError {
    pub step: String,
    pub function: String,
    pub args: String,
    #[source]
    pub source: OperationError,
}

/// Checkpoint records that cannot be read, written or decoded
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint '{path}' could not be read: {reason}")]
    Read { path: String, reason: String },

    #[error("checkpoint '{path}' could not be written: {reason}")]
    Write { path: String, reason: String },

    #[error("checkpoint '{path}' is malformed: {reason}")]
    Malformed { path: String, reason: String },

    #[error("{kind} value cannot be checkpointed to '{path}'")]
    Unencodable { path: String, kind: ValueKind },
}

/// Failures of the preflight script runner
#[derive(Debug, Error)]
pub enum PreflightError {
    #[error("failed to spawn script runner: {0}")]
    Spawn(String),

    #[error("script timed out after {0} seconds")]
    Timeout(u64),

    #[error("script exited with code {code}: {stderr}")]
    Failed { code: i32, stderr: String },
}

/// Any error that aborts a pipeline run
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Naming(#[from] NamingError),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error("step '{step}': {source}")]
    FunctionResolution {
        step: String,
        #[source]
        source: FunctionResolutionError,
    },

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("step '{step}': {source}")]
    Checkpoint {
        step: String,
        #[source]
        source: CheckpointError,
    },

    #[error("Failed to execute pre-flight script: {0}")]
    Preflight(#[from] PreflightError),
}

impl PipelineError {
    /// Name of the step the error is attributed to, if any
    pub fn step(&self) -> Option<&str> {
        match self {
            PipelineError::FunctionResolution { step, .. } => Some(step),
            PipelineError::Checkpoint { step, .. } => Some(step),
            PipelineError::Execution(e) => Some(&e.step),
            _ => None,
        }
    }
}
