//! Operation catalog
//!
//! Steps can only invoke what is registered here: free operations under a
//! dotted namespace (`math.add`), and per-value-kind methods and data
//! attributes (`table.groupby`, `table.columns`). Anything else fails closed.

pub mod builtin;

pub use builtin::{standard_catalog, BuiltinConnectionFactory, MemoryDatabase};

use crate::core::error::{FunctionResolutionError, OperationError};
use crate::core::value::{Value, ValueKind};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Arc;

/// Something a step can invoke
pub trait Operation: Send + Sync {
    /// `receiver` is set when the operation was looked up on a value
    fn invoke(&self, receiver: Option<&Value>, args: CallArgs) -> Result<Value, OperationError>;
}

impl<F> Operation for F
where
    F: Fn(Option<&Value>, CallArgs) -> Result<Value, OperationError> + Send + Sync,
{
    fn invoke(&self, receiver: Option<&Value>, args: CallArgs) -> Result<Value, OperationError> {
        self(receiver, args)
    }
}

/// Wrap a closure as a shared operation
pub fn operation<F>(f: F) -> Arc<dyn Operation>
where
    F: Fn(Option<&Value>, CallArgs) -> Result<Value, OperationError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Arguments of one invocation
#[derive(Debug, Clone, Default, PartialEq)]
pub enum CallArgs {
    /// Zero-argument call
    #[default]
    None,
    Positional(Vec<Value>),
    Keyword(IndexMap<String, Value>),
}

impl CallArgs {
    /// Interpret a resolved `args` value: mapping as keywords, list as
    /// positionals, null as no arguments, anything else as one positional
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Null => CallArgs::None,
            Value::List(items) => CallArgs::Positional(items),
            Value::Map(map) => CallArgs::Keyword(map),
            other => CallArgs::Positional(vec![other]),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            CallArgs::None => Value::Null,
            CallArgs::Positional(items) => Value::List(items.clone()),
            CallArgs::Keyword(map) => Value::Map(map.clone()),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            CallArgs::None => 0,
            CallArgs::Positional(items) => items.len(),
            CallArgs::Keyword(map) => map.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up a parameter by keyword name or by position
    pub fn get(&self, name: &str, position: usize) -> Option<&Value> {
        match self {
            CallArgs::None => None,
            CallArgs::Positional(items) => items.get(position),
            CallArgs::Keyword(map) => map.get(name),
        }
    }

    pub fn required(&self, name: &str, position: usize) -> Result<&Value, OperationError> {
        self.get(name, position)
            .ok_or_else(|| OperationError::MissingArgument(name.to_string()))
    }

    pub fn required_str(&self, name: &str, position: usize) -> Result<&str, OperationError> {
        let value = self.required(name, position)?;
        value.as_str().ok_or(OperationError::InvalidArgument {
            name: name.to_string(),
            expected: "a string",
            found: value.kind(),
        })
    }

    pub fn required_number(&self, name: &str, position: usize) -> Result<&Value, OperationError> {
        let value = self.required(name, position)?;
        match value {
            Value::Int(_) | Value::Float(_) => Ok(value),
            other => Err(OperationError::InvalidArgument {
                name: name.to_string(),
                expected: "a number",
                found: other.kind(),
            }),
        }
    }

    pub fn optional_int(&self, name: &str, position: usize) -> Result<Option<i64>, OperationError> {
        match self.get(name, position) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Int(i)) => Ok(Some(*i)),
            Some(other) => Err(OperationError::InvalidArgument {
                name: name.to_string(),
                expected: "an integer",
                found: other.kind(),
            }),
        }
    }

    pub fn optional_bool(&self, name: &str, position: usize) -> Result<Option<bool>, OperationError> {
        match self.get(name, position) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(other) => Err(OperationError::InvalidArgument {
                name: name.to_string(),
                expected: "a boolean",
                found: other.kind(),
            }),
        }
    }

    /// Reject parameters outside the accepted set
    pub fn expect_only(&self, names: &[&str]) -> Result<(), OperationError> {
        match self {
            CallArgs::None => Ok(()),
            CallArgs::Positional(items) if items.len() > names.len() => Err(
                OperationError::UnexpectedArgument(format!("#{}", names.len() + 1)),
            ),
            CallArgs::Positional(_) => Ok(()),
            CallArgs::Keyword(map) => match map.keys().find(|k| !names.contains(&k.as_str())) {
                Some(key) => Err(OperationError::UnexpectedArgument(key.clone())),
                None => Ok(()),
            },
        }
    }

    /// Compact text form used in error messages and logs
    pub fn render(&self) -> String {
        match self {
            CallArgs::None => "()".to_string(),
            _ => self.to_value().to_plain_json().to_string(),
        }
    }
}

enum Entry {
    Namespace(Namespace),
    Operation(Arc<dyn Operation>),
}

#[derive(Default)]
struct Namespace {
    entries: IndexMap<String, Entry>,
}

/// What a value offers under a given name
pub enum Capability {
    /// An invokable method, to be bound to the receiver
    Method(Arc<dyn Operation>),
    /// A data attribute, already evaluated
    Attribute(Value),
    Missing,
}

type AttributeFn = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// Registry of everything a pipeline may invoke
#[derive(Default)]
pub struct OperationCatalog {
    root: Namespace,
    methods: HashMap<(ValueKind, String), Arc<dyn Operation>>,
    attributes: HashMap<(ValueKind, String), AttributeFn>,
}

impl OperationCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a free operation under a dotted path
    pub fn register_function<F>(&mut self, path: &str, f: F) -> &mut Self
    where
        F: Fn(CallArgs) -> Result<Value, OperationError> + Send + Sync + 'static,
    {
        let op = operation(move |_, args| f(args));
        self.insert(path, op);
        self
    }

    /// Register a method invokable on values of one kind
    pub fn register_method<F>(&mut self, kind: ValueKind, name: &str, f: F) -> &mut Self
    where
        F: Fn(&Value, CallArgs) -> Result<Value, OperationError> + Send + Sync + 'static,
    {
        let method = name.to_string();
        let op = operation(move |receiver, args| match receiver {
            Some(value) => f(value, args),
            None => Err(OperationError::Failed(format!(
                "method '{}' called without a receiver",
                method
            ))),
        });
        self.methods.insert((kind, name.to_string()), op);
        self
    }

    /// Register a data attribute readable on values of one kind
    pub fn register_attribute<F>(&mut self, kind: ValueKind, name: &str, f: F) -> &mut Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        self.attributes.insert((kind, name.to_string()), Arc::new(f));
        self
    }

    fn insert(&mut self, path: &str, op: Arc<dyn Operation>) {
        let segments: Vec<&str> = path.split('.').collect();
        let Some((last, parents)) = segments.split_last() else {
            return;
        };

        let mut namespace = &mut self.root;
        for segment in parents {
            let entry = namespace
                .entries
                .entry(segment.to_string())
                .or_insert_with(|| Entry::Namespace(Namespace::default()));
            // A later nested registration shadows a leaf of the same name
            if let Entry::Operation(_) = entry {
                *entry = Entry::Namespace(Namespace::default());
            }
            let Entry::Namespace(ns) = entry else {
                return;
            };
            namespace = ns;
        }
        namespace
            .entries
            .insert(last.to_string(), Entry::Operation(op));
    }

    /// Walk the namespace tree to a free operation
    pub fn resolve(&self, path: &str) -> Result<Arc<dyn Operation>, FunctionResolutionError> {
        let mut namespace = &self.root;
        let mut segments = path.split('.').peekable();

        while let Some(segment) = segments.next() {
            let not_found = || FunctionResolutionError::NameNotFound {
                path: path.to_string(),
                segment: segment.to_string(),
            };
            match namespace.entries.get(segment).ok_or_else(not_found)? {
                Entry::Namespace(ns) => namespace = ns,
                Entry::Operation(op) => {
                    return match segments.next() {
                        None => Ok(op.clone()),
                        Some(next) => Err(FunctionResolutionError::NameNotFound {
                            path: path.to_string(),
                            segment: next.to_string(),
                        }),
                    };
                }
            }
        }

        Err(FunctionResolutionError::NotCallable {
            target: path.to_string(),
        })
    }

    /// Look up `name` on a value: mapping keys first, then data attributes,
    /// then methods
    pub fn capability(&self, receiver: &Value, name: &str) -> Capability {
        if let Some(value) = receiver.as_map().and_then(|m| m.get(name)) {
            return Capability::Attribute(value.clone());
        }

        let key = (receiver.kind(), name.to_string());
        if let Some(attribute) = self.attributes.get(&key) {
            return Capability::Attribute(attribute(receiver));
        }
        match self.methods.get(&key) {
            Some(op) => Capability::Method(op.clone()),
            None => Capability::Missing,
        }
    }
}
