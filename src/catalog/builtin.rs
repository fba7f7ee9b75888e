//! Built-in operations and the in-memory table database connection

use super::{CallArgs, OperationCatalog};
use crate::core::context::ConnectionFactory;
use crate::core::error::{ConnectionError, OperationError};
use crate::core::table::{Aggregate, GroupedTable, Table};
use crate::core::value::{ConnectionHandle, ConnectionResource, Value, ValueKind};
use indexmap::IndexMap;
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tracing::debug;

/// Catalog with every built-in operation registered
pub fn standard_catalog() -> OperationCatalog {
    let mut catalog = OperationCatalog::new();
    register_math(&mut catalog);
    register_text(&mut catalog);
    register_collections(&mut catalog);
    register_tables(&mut catalog);
    catalog
}

fn register_math(catalog: &mut OperationCatalog) {
    catalog
        .register_function("math.add", |args| {
            arithmetic(&args, "math.add", i64::checked_add, |a, b| a + b)
        })
        .register_function("math.subtract", |args| {
            arithmetic(&args, "math.subtract", i64::checked_sub, |a, b| a - b)
        })
        .register_function("math.multiply", |args| {
            arithmetic(&args, "math.multiply", i64::checked_mul, |a, b| a * b)
        })
        .register_function("math.divide", |args| {
            args.expect_only(&["a", "b"])?;
            let a = args.required_number("a", 0)?.as_f64().unwrap_or_default();
            let b = args.required_number("b", 1)?.as_f64().unwrap_or_default();
            if b == 0.0 {
                return Err(OperationError::Failed("division by zero".to_string()));
            }
            Ok(Value::Float(a / b))
        });
}

/// Integer arithmetic while both operands are ints, float otherwise
fn arithmetic(
    args: &CallArgs,
    name: &str,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Result<Value, OperationError> {
    args.expect_only(&["a", "b"])?;
    let a = args.required_number("a", 0)?;
    let b = args.required_number("b", 1)?;

    match (a, b) {
        (Value::Int(x), Value::Int(y)) => int_op(*x, *y)
            .map(Value::Int)
            .ok_or_else(|| OperationError::Failed(format!("integer overflow in {}", name))),
        _ => Ok(Value::Float(float_op(
            a.as_f64().unwrap_or_default(),
            b.as_f64().unwrap_or_default(),
        ))),
    }
}

fn register_text(catalog: &mut OperationCatalog) {
    catalog
        .register_function("text.concat", |args| {
            let parts: Vec<String> = match &args {
                CallArgs::None => Vec::new(),
                CallArgs::Positional(items) => items.iter().map(Value::render).collect(),
                CallArgs::Keyword(_) => {
                    args.expect_only(&["values", "sep"])?;
                    let values = args.required("values", 0)?;
                    let items = values.as_list().ok_or(OperationError::InvalidArgument {
                        name: "values".to_string(),
                        expected: "a list",
                        found: values.kind(),
                    })?;
                    items.iter().map(Value::render).collect()
                }
            };
            let sep = match &args {
                CallArgs::Keyword(map) => map.get("sep").map(Value::render).unwrap_or_default(),
                _ => String::new(),
            };
            Ok(Value::Str(parts.join(&sep)))
        })
        .register_function("text.upper", |args| {
            args.expect_only(&["text"])?;
            Ok(Value::Str(args.required_str("text", 0)?.to_uppercase()))
        })
        .register_function("text.format", |args| {
            let template = args.required_str("template", 0)?;
            let mut text = template.to_string();
            match &args {
                CallArgs::Keyword(map) => {
                    for (key, value) in map.iter().filter(|(k, _)| k.as_str() != "template") {
                        text = text.replace(&format!("{{{}}}", key), &value.render());
                    }
                }
                CallArgs::Positional(items) => {
                    for (i, value) in items.iter().skip(1).enumerate() {
                        text = text.replace(&format!("{{{}}}", i), &value.render());
                    }
                }
                CallArgs::None => {}
            }
            Ok(Value::Str(text))
        });

    catalog
        .register_method(ValueKind::Str, "upper", |receiver, args| {
            args.expect_only(&[])?;
            Ok(Value::Str(receiver.render().to_uppercase()))
        })
        .register_method(ValueKind::Str, "lower", |receiver, args| {
            args.expect_only(&[])?;
            Ok(Value::Str(receiver.render().to_lowercase()))
        })
        .register_attribute(ValueKind::Str, "len", |receiver| {
            Value::Int(receiver.as_str().map_or(0, |s| s.chars().count()) as i64)
        });
}

fn register_collections(catalog: &mut OperationCatalog) {
    catalog
        .register_function("collections.list", |args| match args {
            CallArgs::None => Ok(Value::List(Vec::new())),
            CallArgs::Positional(items) => Ok(Value::List(items)),
            CallArgs::Keyword(map) => Ok(Value::List(map.into_values().collect())),
        })
        .register_function("collections.map", |args| match args {
            CallArgs::None => Ok(Value::Map(IndexMap::new())),
            CallArgs::Keyword(map) => Ok(Value::Map(map)),
            CallArgs::Positional(_) => Err(OperationError::Failed(
                "collections.map takes keyword arguments".to_string(),
            )),
        });

    catalog
        .register_attribute(ValueKind::List, "len", |receiver| {
            Value::Int(receiver.as_list().map_or(0, <[Value]>::len) as i64)
        })
        .register_method(ValueKind::Map, "keys", |receiver, args| {
            args.expect_only(&[])?;
            let keys = receiver
                .as_map()
                .map(|m| m.keys().cloned().map(Value::Str).collect())
                .unwrap_or_default();
            Ok(Value::List(keys))
        });
}

fn register_tables(catalog: &mut OperationCatalog) {
    catalog
        .register_function("table.from_records", |args| {
            let records = match &args {
                CallArgs::Positional(items) => match items.as_slice() {
                    [Value::List(records)] => records.clone(),
                    _ => items.clone(),
                },
                _ => {
                    args.expect_only(&["records"])?;
                    list_argument(&args, "records", 0)?.to_vec()
                }
            };
            Ok(Value::Table(Table::from_records(&records)?))
        })
        .register_function("table.read_json", |args| {
            args.expect_only(&["path"])?;
            let path = args.required_str("path", 0)?;
            let raw = std::fs::read_to_string(path)?;
            let json: serde_json::Value = serde_json::from_str(&raw)
                .map_err(|e| OperationError::Failed(format!("{} is not valid JSON: {}", path, e)))?;
            match Value::from_plain_json(&json) {
                Value::List(records) => Ok(Value::Table(Table::from_records(&records)?)),
                other => Err(OperationError::Failed(format!(
                    "{} must contain a list of records, found {}",
                    path,
                    other.kind()
                ))),
            }
        })
        .register_function("db.read_table", |args| {
            args.expect_only(&["name", "con"])?;
            let name = args.required_str("name", 0)?;
            let db = database_argument(&args, "con", 1)?;
            Ok(Value::Table(db.read_table(name)?))
        });

    catalog
        .register_method(ValueKind::Table, "groupby", |receiver, args| {
            args.expect_only(&["by"])?;
            let by = args.required_str("by", 0)?;
            Ok(Value::Grouped(table(receiver)?.group_by(by)?))
        })
        .register_method(ValueKind::Table, "select", |receiver, args| {
            args.expect_only(&["columns"])?;
            let columns = match args.required("columns", 0)? {
                Value::Str(column) => vec![column.clone()],
                Value::List(items) => items
                    .iter()
                    .map(|v| {
                        v.as_str().map(str::to_string).ok_or(OperationError::InvalidArgument {
                            name: "columns".to_string(),
                            expected: "a list of column names",
                            found: v.kind(),
                        })
                    })
                    .collect::<Result<_, _>>()?,
                other => {
                    return Err(OperationError::InvalidArgument {
                        name: "columns".to_string(),
                        expected: "a column name or a list of names",
                        found: other.kind(),
                    })
                }
            };
            Ok(Value::Table(table(receiver)?.select(&columns)?))
        })
        .register_method(ValueKind::Table, "head", |receiver, args| {
            args.expect_only(&["n"])?;
            let n = args.optional_int("n", 0)?.unwrap_or(5).max(0) as usize;
            Ok(Value::Table(table(receiver)?.head(n)))
        })
        .register_method(ValueKind::Table, "sort_by", |receiver, args| {
            args.expect_only(&["by", "descending"])?;
            let by = args.required_str("by", 0)?;
            let descending = args.optional_bool("descending", 1)?.unwrap_or(false);
            Ok(Value::Table(table(receiver)?.sort_by(by, descending)?))
        })
        .register_method(ValueKind::Table, "to_records", |receiver, args| {
            args.expect_only(&[])?;
            Ok(Value::List(table(receiver)?.to_records()))
        })
        .register_method(ValueKind::Table, "to_json", |receiver, args| {
            args.expect_only(&["path"])?;
            let path = args.required_str("path", 0)?;
            let json = receiver.to_plain_json();
            let text = serde_json::to_string_pretty(&json)
                .map_err(|e| OperationError::Failed(e.to_string()))?;
            std::fs::write(path, text)?;
            Ok(Value::Null)
        })
        .register_method(ValueKind::Table, "to_table", |receiver, args| {
            args.expect_only(&["name", "con"])?;
            let name = args.required_str("name", 0)?;
            let db = database_argument(&args, "con", 1)?;
            let data = table(receiver)?.clone();
            let rows = data.len();
            db.write_table(name, data)?;
            Ok(Value::Int(rows as i64))
        })
        .register_attribute(ValueKind::Table, "columns", |receiver| {
            Value::List(
                receiver
                    .as_table()
                    .map(|t| t.columns().iter().cloned().map(Value::Str).collect())
                    .unwrap_or_default(),
            )
        })
        .register_attribute(ValueKind::Table, "shape", |receiver| {
            let (rows, columns) = receiver.as_table().map(Table::shape).unwrap_or_default();
            Value::List(vec![Value::Int(rows as i64), Value::Int(columns as i64)])
        })
        .register_attribute(ValueKind::Table, "len", |receiver| {
            Value::Int(receiver.as_table().map_or(0, Table::len) as i64)
        });

    for (name, aggregate) in [
        ("max", Aggregate::Max),
        ("min", Aggregate::Min),
        ("sum", Aggregate::Sum),
        ("count", Aggregate::Count),
        ("mean", Aggregate::Mean),
    ] {
        catalog.register_method(ValueKind::Grouped, name, move |receiver, args| {
            args.expect_only(&[])?;
            Ok(Value::Table(grouped(receiver)?.aggregate(aggregate)))
        });
    }
}

fn table(value: &Value) -> Result<&Table, OperationError> {
    value.as_table().ok_or(OperationError::InvalidArgument {
        name: "self".to_string(),
        expected: "a table",
        found: value.kind(),
    })
}

fn grouped(value: &Value) -> Result<&GroupedTable, OperationError> {
    match value {
        Value::Grouped(grouped) => Ok(grouped),
        other => Err(OperationError::InvalidArgument {
            name: "self".to_string(),
            expected: "a grouped table",
            found: other.kind(),
        }),
    }
}

fn list_argument<'a>(
    args: &'a CallArgs,
    name: &str,
    position: usize,
) -> Result<&'a [Value], OperationError> {
    let value = args.required(name, position)?;
    value.as_list().ok_or(OperationError::InvalidArgument {
        name: name.to_string(),
        expected: "a list",
        found: value.kind(),
    })
}

fn database_argument<'a>(
    args: &'a CallArgs,
    name: &str,
    position: usize,
) -> Result<&'a MemoryDatabase, OperationError> {
    match args.required(name, position)? {
        Value::Connection(handle) => handle.downcast::<MemoryDatabase>().ok_or_else(|| {
            OperationError::Failed(format!(
                "connection '{}' is not a table database",
                handle.name()
            ))
        }),
        other => Err(OperationError::InvalidArgument {
            name: name.to_string(),
            expected: "a connection",
            found: other.kind(),
        }),
    }
}

/// Named tables held in memory, shared by every handle to the same database
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    tables: RwLock<IndexMap<String, Table>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read_table(&self, name: &str) -> Result<Table, OperationError> {
        let tables = self.tables.read().map_err(|_| poisoned())?;
        tables
            .get(name)
            .cloned()
            .ok_or_else(|| OperationError::Failed(format!("no table named '{}'", name)))
    }

    /// Create or replace a table
    pub fn write_table(&self, name: &str, table: Table) -> Result<(), OperationError> {
        let mut tables = self.tables.write().map_err(|_| poisoned())?;
        tables.insert(name.to_string(), table);
        Ok(())
    }
}

fn poisoned() -> OperationError {
    OperationError::Failed("table database lock poisoned".to_string())
}

impl ConnectionResource for MemoryDatabase {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Builds `memory://<database>` connections
///
/// Databases are kept for the lifetime of the factory, so two connections
/// naming the same database see the same tables.
#[derive(Debug, Default)]
pub struct BuiltinConnectionFactory {
    databases: Mutex<HashMap<String, Arc<MemoryDatabase>>>,
}

impl BuiltinConnectionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The database behind `memory://<name>`, created on first use
    pub fn database(&self, name: &str) -> Result<Arc<MemoryDatabase>, ConnectionError> {
        let mut databases = self
            .databases
            .lock()
            .map_err(|_| ConnectionError::Failed("connection registry lock poisoned".to_string()))?;
        Ok(databases
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryDatabase::new()))
            .clone())
    }
}

impl ConnectionFactory for BuiltinConnectionFactory {
    fn connect(&self, name: &str, url: &str) -> Result<ConnectionHandle, ConnectionError> {
        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| ConnectionError::Failed("connection string has no scheme".to_string()))?;
        if scheme != "memory" {
            return Err(ConnectionError::UnsupportedScheme(scheme.to_string()));
        }

        let database = if rest.is_empty() { "default" } else { rest };
        debug!(connection = name, database, "Opening in-memory table database");
        let resource: Arc<dyn ConnectionResource> = self.database(database)?;
        Ok(ConnectionHandle::new(name, url, resource))
    }
}
