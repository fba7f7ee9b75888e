//! Column-oriented tabular values and grouped aggregation

use crate::core::error::OperationError;
use crate::core::value::Value;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Named columns with rows of values
///
/// Every row is exactly as wide as the column list. Deserialization
/// enforces this, so a hand-edited checkpoint cannot produce a ragged table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTable")]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

#[derive(Deserialize)]
struct RawTable {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl TryFrom<RawTable> for Table {
    type Error = String;

    fn try_from(raw: RawTable) -> Result<Self, Self::Error> {
        check_widths(&raw.columns, &raw.rows)?;
        Ok(Self {
            columns: raw.columns,
            rows: raw.rows,
        })
    }
}

fn check_widths(columns: &[String], rows: &[Vec<Value>]) -> Result<(), String> {
    match rows.iter().position(|row| row.len() != columns.len()) {
        Some(index) => Err(format!(
            "row {} has {} values but the table has {} columns",
            index,
            rows[index].len(),
            columns.len()
        )),
        None => Ok(()),
    }
}

impl Table {
    /// Build a table from a list of mappings; columns follow first appearance
    pub fn from_records(records: &[Value]) -> Result<Self, OperationError> {
        let mut columns: Vec<String> = Vec::new();
        for record in records {
            let map = record.as_map().ok_or(OperationError::InvalidArgument {
                name: "records".to_string(),
                expected: "a list of mappings",
                found: record.kind(),
            })?;
            for key in map.keys() {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
        }

        let rows = records
            .iter()
            .filter_map(Value::as_map)
            .map(|map| {
                columns
                    .iter()
                    .map(|c| map.get(c).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect();

        Ok(Self { columns, rows })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// (rows, columns)
    pub fn shape(&self) -> (usize, usize) {
        (self.rows.len(), self.columns.len())
    }

    pub fn column_index(&self, name: &str) -> Result<usize, OperationError> {
        self.columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| OperationError::Failed(format!("no column named '{}'", name)))
    }

    pub fn to_records(&self) -> Vec<Value> {
        self.rows
            .iter()
            .map(|row| {
                Value::Map(
                    self.columns
                        .iter()
                        .cloned()
                        .zip(row.iter().cloned())
                        .collect::<IndexMap<_, _>>(),
                )
            })
            .collect()
    }

    pub fn select(&self, columns: &[String]) -> Result<Table, OperationError> {
        let indices = columns
            .iter()
            .map(|c| self.column_index(c))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Table {
            columns: columns.to_vec(),
            rows: self
                .rows
                .iter()
                .map(|row| indices.iter().map(|&i| row[i].clone()).collect())
                .collect(),
        })
    }

    pub fn head(&self, n: usize) -> Table {
        Table {
            columns: self.columns.clone(),
            rows: self.rows.iter().take(n).cloned().collect(),
        }
    }

    /// Stable sort on one column
    pub fn sort_by(&self, column: &str, descending: bool) -> Result<Table, OperationError> {
        let index = self.column_index(column)?;
        let mut rows = self.rows.clone();
        rows.sort_by(|a, b| {
            let ordering = a[index].compare(&b[index]);
            if descending {
                ordering.reverse()
            } else {
                ordering
            }
        });

        Ok(Table {
            columns: self.columns.clone(),
            rows,
        })
    }

    /// Partition rows by the values of one column, groups ordered by key
    pub fn group_by(&self, column: &str) -> Result<GroupedTable, OperationError> {
        let index = self.column_index(column)?;
        let mut groups: Vec<(Value, Vec<Vec<Value>>)> = Vec::new();

        for row in &self.rows {
            let key = &row[index];
            match groups.iter_mut().find(|(k, _)| k == key) {
                Some((_, rows)) => rows.push(row.clone()),
                None => groups.push((key.clone(), vec![row.clone()])),
            }
        }
        groups.sort_by(|(a, _), (b, _)| a.compare(b));

        Ok(GroupedTable {
            key: column.to_string(),
            columns: self.columns.clone(),
            groups,
        })
    }
}

/// A table partitioned by one key column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawGroupedTable")]
pub struct GroupedTable {
    key: String,
    columns: Vec<String>,
    groups: Vec<(Value, Vec<Vec<Value>>)>,
}

#[derive(Deserialize)]
struct RawGroupedTable {
    key: String,
    columns: Vec<String>,
    groups: Vec<(Value, Vec<Vec<Value>>)>,
}

impl TryFrom<RawGroupedTable> for GroupedTable {
    type Error = String;

    fn try_from(raw: RawGroupedTable) -> Result<Self, Self::Error> {
        if !raw.columns.contains(&raw.key) {
            return Err(format!("group key '{}' is not one of the columns", raw.key));
        }
        for (key, rows) in &raw.groups {
            check_widths(&raw.columns, rows)
                .map_err(|reason| format!("group {}: {}", key.render(), reason))?;
        }
        Ok(Self {
            key: raw.key,
            columns: raw.columns,
            groups: raw.groups,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    Max,
    Min,
    Sum,
    Count,
    Mean,
}

impl GroupedTable {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn groups(&self) -> &[(Value, Vec<Vec<Value>>)] {
        &self.groups
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Reduce every group to one row keyed by the group value
    ///
    /// Sum and mean only cover columns whose non-null values are all numeric.
    pub fn aggregate(&self, aggregate: Aggregate) -> Table {
        let key_index = self.columns.iter().position(|c| c == &self.key);
        let value_columns: Vec<usize> = (0..self.columns.len())
            .filter(|&i| Some(i) != key_index)
            .filter(|&i| match aggregate {
                Aggregate::Sum | Aggregate::Mean => self.is_numeric_column(i),
                _ => true,
            })
            .collect();

        let mut columns = vec![self.key.clone()];
        columns.extend(value_columns.iter().map(|&i| self.columns[i].clone()));

        let rows = self
            .groups
            .iter()
            .map(|(key, rows)| {
                let mut out = vec![key.clone()];
                for &i in &value_columns {
                    let cells: Vec<&Value> =
                        rows.iter().map(|r| &r[i]).filter(|v| !v.is_null()).collect();
                    out.push(reduce(aggregate, &cells));
                }
                out
            })
            .collect();

        Table { columns, rows }
    }

    fn is_numeric_column(&self, index: usize) -> bool {
        self.groups
            .iter()
            .flat_map(|(_, rows)| rows.iter())
            .map(|r| &r[index])
            .filter(|v| !v.is_null())
            .all(|v| v.as_f64().is_some())
    }
}

fn reduce(aggregate: Aggregate, cells: &[&Value]) -> Value {
    match aggregate {
        Aggregate::Count => Value::Int(cells.len() as i64),
        Aggregate::Max => cells
            .iter()
            .copied()
            .max_by(|a, b| a.compare(b))
            .cloned()
            .unwrap_or(Value::Null),
        Aggregate::Min => cells
            .iter()
            .copied()
            .min_by(|a, b| a.compare(b))
            .cloned()
            .unwrap_or(Value::Null),
        Aggregate::Sum => {
            if cells.iter().all(|v| matches!(v, Value::Int(_))) {
                Value::Int(cells.iter().filter_map(|v| v.as_i64()).sum())
            } else {
                Value::Float(cells.iter().filter_map(|v| v.as_f64()).sum())
            }
        }
        Aggregate::Mean => {
            if cells.is_empty() {
                Value::Null
            } else {
                let total: f64 = cells.iter().filter_map(|v| v.as_f64()).sum();
                Value::Float(total / cells.len() as f64)
            }
        }
    }
}
