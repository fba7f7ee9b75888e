//! Execution context - variables, connections and step outputs visible to a step

use crate::core::error::{ConnectionError, ResolutionErrorKind};
use crate::core::value::{ConnectionHandle, Value};
use indexmap::IndexMap;
use once_cell::sync::OnceCell;
use std::sync::Arc;

/// Builds connection handles from connection strings
pub trait ConnectionFactory: Send + Sync {
    fn connect(&self, name: &str, url: &str) -> Result<ConnectionHandle, ConnectionError>;
}

/// Output and resolved arguments of an executed step
#[derive(Debug, Clone, PartialEq)]
pub struct StepRecord {
    pub output: Value,

    /// Resolved `args`: a mapping, a list, or null
    pub args: Value,
}

struct ConnectionSlot {
    url: String,
    handle: OnceCell<ConnectionHandle>,
}

/// Declared connections, each opened on first reference and then reused
pub struct ConnectionPool {
    slots: IndexMap<String, ConnectionSlot>,
    factory: Arc<dyn ConnectionFactory>,
}

impl ConnectionPool {
    pub fn new(factory: Arc<dyn ConnectionFactory>) -> Self {
        Self {
            slots: IndexMap::new(),
            factory,
        }
    }

    /// Declare a connection; `url` must already have variables substituted
    pub fn declare(&mut self, name: impl Into<String>, url: impl Into<String>) {
        self.slots.insert(
            name.into(),
            ConnectionSlot {
                url: url.into(),
                handle: OnceCell::new(),
            },
        );
    }

    pub fn contains(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    /// The handle for `name`, constructing it on first use
    pub fn get(&self, name: &str) -> Result<ConnectionHandle, ResolutionErrorKind> {
        let slot = self
            .slots
            .get(name)
            .ok_or_else(|| ResolutionErrorKind::UnknownConnection(name.to_string()))?;

        slot.handle
            .get_or_try_init(|| {
                tracing::debug!(connection = name, "Opening connection");
                self.factory.connect(name, &slot.url)
            })
            .cloned()
            .map_err(|e| ResolutionErrorKind::ConnectionFailed {
                name: name.to_string(),
                reason: e.to_string(),
            })
    }

    /// Number of connections constructed so far
    pub fn opened(&self) -> usize {
        self.slots.values().filter(|s| s.handle.get().is_some()).count()
    }
}

/// Everything visible to the step about to run
///
/// Grows monotonically: step outputs are bound once and never replaced.
pub struct ExecutionContext {
    variables: Arc<IndexMap<String, Value>>,
    connections: ConnectionPool,
    steps: IndexMap<String, Arc<StepRecord>>,
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("variables", &self.variables.keys().collect::<Vec<_>>())
            .field("connections", &self.connections.slots.keys().collect::<Vec<_>>())
            .field("steps", &self.steps.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ExecutionContext {
    pub fn new(variables: IndexMap<String, Value>, connections: ConnectionPool) -> Self {
        Self {
            variables: Arc::new(variables),
            connections,
            steps: IndexMap::new(),
        }
    }

    pub fn variables(&self) -> &IndexMap<String, Value> {
        &self.variables
    }

    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub fn connection(&self, name: &str) -> Result<ConnectionHandle, ResolutionErrorKind> {
        self.connections.get(name)
    }

    pub fn connections(&self) -> &ConnectionPool {
        &self.connections
    }

    pub fn step(&self, name: &str) -> Option<&StepRecord> {
        self.steps.get(name).map(Arc::as_ref)
    }

    /// Output of a completed step
    pub fn output(&self, name: &str) -> Option<&Value> {
        self.step(name).map(|record| &record.output)
    }

    /// Bind a step's record under its name and aliases
    ///
    /// Names that are already bound keep their first record.
    pub fn bind_step(&mut self, name: &str, aliases: &[String], record: StepRecord) {
        let record = Arc::new(record);
        for key in std::iter::once(name).chain(aliases.iter().map(String::as_str)) {
            self.steps
                .entry(key.to_string())
                .or_insert_with(|| record.clone());
        }
    }
}
