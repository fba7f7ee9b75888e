//! Runtime values produced and consumed by pipeline steps
//!
//! Every value a step can produce is one of a fixed set of variants. Data
//! variants serialize (and can therefore be checkpointed); connections and
//! callables are opaque runtime handles and refuse to serialize.

use crate::catalog::{CallArgs, Operation};
use crate::core::error::{ConfigError, OperationError};
use crate::core::table::{GroupedTable, Table};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// The variant tag of a [`Value`], used for capability lookup and errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Null,
    Bool,
    Int,
    Float,
    Str,
    List,
    Map,
    Table,
    Grouped,
    Connection,
    Callable,
}

impl ValueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::Null => "null",
            ValueKind::Bool => "bool",
            ValueKind::Int => "int",
            ValueKind::Float => "float",
            ValueKind::Str => "str",
            ValueKind::List => "list",
            ValueKind::Map => "map",
            ValueKind::Table => "table",
            ValueKind::Grouped => "grouped",
            ValueKind::Connection => "connection",
            ValueKind::Callable => "callable",
        }
    }

    fn rank(&self) -> u8 {
        *self as u8
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value bound in the execution context
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Map(IndexMap<String, Value>),
    Table(Table),
    Grouped(GroupedTable),
    #[serde(skip)]
    Connection(ConnectionHandle),
    #[serde(skip)]
    Callable(Callable),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::Str(_) => ValueKind::Str,
            Value::List(_) => ValueKind::List,
            Value::Map(_) => ValueKind::Map,
            Value::Table(_) => ValueKind::Table,
            Value::Grouped(_) => ValueKind::Grouped,
            Value::Connection(_) => ValueKind::Connection,
            Value::Callable(_) => ValueKind::Callable,
        }
    }

    pub fn str(s: impl Into<String>) -> Self {
        Value::Str(s.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view of ints and floats
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&Table> {
        match self {
            Value::Table(table) => Some(table),
            _ => None,
        }
    }

    /// The first connection or callable nested anywhere in this value
    ///
    /// Such values have no persisted form.
    pub fn find_opaque(&self) -> Option<ValueKind> {
        match self {
            Value::Connection(_) | Value::Callable(_) => Some(self.kind()),
            Value::List(items) => items.iter().find_map(Value::find_opaque),
            Value::Map(map) => map.values().find_map(Value::find_opaque),
            Value::Table(table) => table.rows().iter().flatten().find_map(Value::find_opaque),
            _ => None,
        }
    }

    /// Render as text for string interpolation
    pub fn render(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => render_float(*f),
            Value::Str(s) => s.clone(),
            Value::List(_) | Value::Map(_) | Value::Table(_) => self.to_plain_json().to_string(),
            Value::Grouped(grouped) => format!(
                "GroupedTable(by={}, groups={})",
                grouped.key(),
                grouped.len()
            ),
            Value::Connection(handle) => format!("Connection({})", handle.redacted_url()),
            Value::Callable(callable) => format!("<callable {}>", callable.name()),
        }
    }

    /// Untagged JSON view: tables become lists of records
    pub fn to_plain_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(i) => Json::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::Str(s) => Json::String(s.clone()),
            Value::List(items) => Json::Array(items.iter().map(Value::to_plain_json).collect()),
            Value::Map(map) => Json::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_plain_json()))
                    .collect(),
            ),
            Value::Table(table) => Json::Array(
                table
                    .to_records()
                    .iter()
                    .map(Value::to_plain_json)
                    .collect(),
            ),
            Value::Grouped(grouped) => serde_json::json!({
                "by": grouped.key(),
                "groups": grouped
                    .groups()
                    .iter()
                    .map(|(key, rows)| serde_json::json!({
                        "key": key.to_plain_json(),
                        "rows": rows.len(),
                    }))
                    .collect::<Vec<_>>(),
            }),
            Value::Connection(_) | Value::Callable(_) => Json::String(self.render()),
        }
    }

    pub fn from_plain_json(json: &serde_json::Value) -> Self {
        use serde_json::Value as Json;
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(s) => Value::Str(s.clone()),
            Json::Array(items) => Value::List(items.iter().map(Value::from_plain_json).collect()),
            Json::Object(map) => Value::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_plain_json(v)))
                    .collect(),
            ),
        }
    }

    /// Convert a YAML document node into a value
    pub fn from_yaml(yaml: &serde_yaml::Value) -> Result<Self, ConfigError> {
        use serde_yaml::Value as Yaml;
        Ok(match yaml {
            Yaml::Null => Value::Null,
            Yaml::Bool(b) => Value::Bool(*b),
            Yaml::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Yaml::String(s) => Value::Str(s.clone()),
            Yaml::Sequence(items) => Value::List(
                items
                    .iter()
                    .map(Value::from_yaml)
                    .collect::<Result<_, _>>()?,
            ),
            Yaml::Mapping(mapping) => {
                let mut map = IndexMap::with_capacity(mapping.len());
                for (key, value) in mapping {
                    map.insert(yaml_key(key)?, Value::from_yaml(value)?);
                }
                Value::Map(map)
            }
            Yaml::Tagged(tagged) => Value::from_yaml(&tagged.value)?,
        })
    }

    /// Total order used for sorting and min/max aggregation
    pub fn compare(&self, other: &Value) -> Ordering {
        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
            _ => match (self, other) {
                (Value::Str(a), Value::Str(b)) => a.cmp(b),
                (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
                _ => self.kind().rank().cmp(&other.kind().rank()),
            },
        }
    }
}

/// Render a YAML mapping key as text
pub(crate) fn yaml_key(key: &serde_yaml::Value) -> Result<String, ConfigError> {
    use serde_yaml::Value as Yaml;
    match key {
        Yaml::String(s) => Ok(s.clone()),
        Yaml::Number(n) => Ok(n.to_string()),
        Yaml::Bool(b) => Ok(b.to_string()),
        Yaml::Null => Ok("null".to_string()),
        _ => Err(ConfigError::Invalid(
            "mapping keys must be scalar values".to_string(),
        )),
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Table(a), Value::Table(b)) => a == b,
            (Value::Grouped(a), Value::Grouped(b)) => a == b,
            (Value::Connection(a), Value::Connection(b)) => a.same_resource(b),
            (Value::Callable(a), Value::Callable(b)) => {
                a.name == b.name && a.receiver == b.receiver
            }
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<Table> for Value {
    fn from(table: Table) -> Self {
        Value::Table(table)
    }
}

/// Backing resource of a connection, owned by whoever built it
pub trait ConnectionResource: fmt::Debug + Send + Sync {
    fn as_any(&self) -> &dyn Any;
}

/// A named handle to an external resource, shared read-only across steps
#[derive(Clone)]
pub struct ConnectionHandle {
    name: String,
    url: String,
    resource: Arc<dyn ConnectionResource>,
}

impl ConnectionHandle {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        resource: Arc<dyn ConnectionResource>,
    ) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            resource,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn resource(&self) -> &dyn ConnectionResource {
        self.resource.as_ref()
    }

    /// Downcast the backing resource
    pub fn downcast<T: 'static>(&self) -> Option<&T> {
        self.resource.as_any().downcast_ref::<T>()
    }

    pub fn same_resource(&self, other: &ConnectionHandle) -> bool {
        Arc::ptr_eq(&self.resource, &other.resource)
    }

    /// The connection URL with any password masked
    pub fn redacted_url(&self) -> String {
        let Some(scheme_end) = self.url.find("://") else {
            return self.url.clone();
        };
        let rest = &self.url[scheme_end + 3..];
        let Some(at) = rest.find('@') else {
            return self.url.clone();
        };
        let userinfo = &rest[..at];
        match userinfo.find(':') {
            Some(colon) => format!(
                "{}{}:***{}",
                &self.url[..scheme_end + 3],
                &userinfo[..colon],
                &rest[at..]
            ),
            None => self.url.clone(),
        }
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("name", &self.name)
            .field("url", &self.redacted_url())
            .finish()
    }
}

/// An invokable operation, optionally bound to a receiver value
#[derive(Clone)]
pub struct Callable {
    name: String,
    operation: Arc<dyn Operation>,
    receiver: Option<Box<Value>>,
}

impl Callable {
    /// A free operation from the catalog namespace
    pub fn free(name: impl Into<String>, operation: Arc<dyn Operation>) -> Self {
        Self {
            name: name.into(),
            operation,
            receiver: None,
        }
    }

    /// A capability bound to the value it was looked up on
    pub fn bound(name: impl Into<String>, operation: Arc<dyn Operation>, receiver: Value) -> Self {
        Self {
            name: name.into(),
            operation,
            receiver: Some(Box::new(receiver)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn receiver(&self) -> Option<&Value> {
        self.receiver.as_deref()
    }

    pub fn invoke(&self, args: CallArgs) -> Result<Value, OperationError> {
        self.operation.invoke(self.receiver.as_deref(), args)
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callable")
            .field("name", &self.name)
            .field("receiver", &self.receiver.as_ref().map(|r| r.kind()))
            .finish()
    }
}

/// Whole-number floats keep a trailing `.0` so they stay distinguishable
/// from integers once interpolated into text
fn render_float(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{:.1}", f)
    } else {
        f.to_string()
    }
}
