//! Evaluation of references against the execution context

use super::parser::{Accessor, Expression, Reference, Root, Segment, Template};
use crate::catalog::{Capability, OperationCatalog};
use crate::core::context::ExecutionContext;
use crate::core::error::{ResolutionError, ResolutionErrorKind};
use crate::core::value::{Callable, Value, ValueKind};
use std::fmt;

/// Location of a field inside the document, e.g. `steps[3].args.by`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath(String);

impl FieldPath {
    pub fn new(root: impl Into<String>) -> Self {
        Self(root.into())
    }

    /// A field of the step at `index` in document order
    pub fn step(index: usize, field: &str) -> Self {
        Self(format!("steps[{}].{}", index, field))
    }

    pub fn key(&self, key: &str) -> Self {
        Self(format!("{}.{}", self.0, key))
    }

    pub fn index(&self, index: usize) -> Self {
        Self(format!("{}[{}]", self.0, index))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resolves `${...}` expressions in document values
pub struct ExpressionResolver<'a> {
    context: &'a ExecutionContext,
    catalog: &'a OperationCatalog,
}

impl<'a> ExpressionResolver<'a> {
    pub fn new(context: &'a ExecutionContext, catalog: &'a OperationCatalog) -> Self {
        Self { context, catalog }
    }

    /// Replace every expression in a nested value; mapping keys are left alone
    pub fn resolve(&self, value: &Value, field: &FieldPath) -> Result<Value, ResolutionError> {
        match value {
            Value::Str(text) => self.resolve_str(text, field),
            Value::List(items) => items
                .iter()
                .enumerate()
                .map(|(i, item)| self.resolve(item, &field.index(i)))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            Value::Map(map) => {
                let mut resolved = indexmap::IndexMap::with_capacity(map.len());
                for (key, item) in map {
                    resolved.insert(key.clone(), self.resolve(item, &field.key(key))?);
                }
                Ok(Value::Map(resolved))
            }
            other => Ok(other.clone()),
        }
    }

    /// Resolve a field that must end up as text
    ///
    /// Scalars render to text; anything else is rejected.
    pub fn resolve_text(&self, value: &Value, field: &FieldPath) -> Result<String, ResolutionError> {
        match self.resolve(value, field)? {
            Value::Str(s) => Ok(s),
            scalar @ (Value::Bool(_) | Value::Int(_) | Value::Float(_)) => Ok(scalar.render()),
            other => Err(ResolutionError {
                expression: value.render(),
                field: field.to_string(),
                kind: ResolutionErrorKind::NotText(other.kind()),
            }),
        }
    }

    fn resolve_str(&self, text: &str, field: &FieldPath) -> Result<Value, ResolutionError> {
        let template = Template::parse(text).map_err(|e| ResolutionError {
            expression: e.expression,
            field: field.to_string(),
            kind: ResolutionErrorKind::InvalidExpression(e.reason),
        })?;

        match template {
            Template::Literal(s) => Ok(Value::Str(s)),
            Template::Single(expr) => self.evaluate_at(&expr, field),
            Template::Interpolated(segments) => {
                let mut out = String::new();
                for segment in &segments {
                    match segment {
                        Segment::Text(t) => out.push_str(t),
                        Segment::Expr(expr) => out.push_str(&self.evaluate_at(expr, field)?.render()),
                    }
                }
                Ok(Value::Str(out))
            }
        }
    }

    fn evaluate_at(&self, expr: &Expression, field: &FieldPath) -> Result<Value, ResolutionError> {
        self.evaluate(&expr.reference).map_err(|kind| ResolutionError {
            expression: expr.text.clone(),
            field: field.to_string(),
            kind,
        })
    }

    /// Look up the root of a reference, then walk its accessors
    pub fn evaluate(&self, reference: &Reference) -> Result<Value, ResolutionErrorKind> {
        let mut current = match &reference.root {
            Root::Variable(name) => self
                .context
                .variable(name)
                .cloned()
                .ok_or_else(|| ResolutionErrorKind::UnknownVariable(name.clone()))?,
            Root::Connection(name) => Value::Connection(self.context.connection(name)?),
            Root::StepOutput(name) => self
                .context
                .step(name)
                .map(|record| record.output.clone())
                .ok_or_else(|| ResolutionErrorKind::UnknownStep(name.clone()))?,
            Root::StepArgs(name) => self
                .context
                .step(name)
                .map(|record| record.args.clone())
                .ok_or_else(|| ResolutionErrorKind::UnknownStep(name.clone()))?,
        };

        for accessor in &reference.accessors {
            current = self.access(current, accessor)?;
        }
        Ok(current)
    }

    fn access(&self, current: Value, accessor: &Accessor) -> Result<Value, ResolutionErrorKind> {
        match accessor {
            Accessor::Attr(name) => match self.catalog.capability(&current, name) {
                Capability::Attribute(value) => Ok(value),
                Capability::Method(op) => Ok(Value::Callable(Callable::bound(name, op, current))),
                Capability::Missing => Err(ResolutionErrorKind::UnknownAttribute {
                    attribute: name.clone(),
                    kind: current.kind(),
                }),
            },
            Accessor::Key(key) => match &current {
                Value::Map(map) => map.get(key).cloned().ok_or_else(|| {
                    ResolutionErrorKind::UnknownAttribute {
                        attribute: key.clone(),
                        kind: ValueKind::Map,
                    }
                }),
                // Column values of a table
                Value::Table(table) => {
                    let index = table.column_index(key).map_err(|_| {
                        ResolutionErrorKind::UnknownAttribute {
                            attribute: key.clone(),
                            kind: ValueKind::Table,
                        }
                    })?;
                    Ok(Value::List(
                        table.rows().iter().map(|row| row[index].clone()).collect(),
                    ))
                }
                other => Err(ResolutionErrorKind::UnknownAttribute {
                    attribute: key.clone(),
                    kind: other.kind(),
                }),
            },
            Accessor::Index(index) => match &current {
                Value::List(items) => {
                    items
                        .get(*index)
                        .cloned()
                        .ok_or(ResolutionErrorKind::IndexOutOfRange {
                            index: *index,
                            len: items.len(),
                        })
                }
                Value::Table(table) => table
                    .to_records()
                    .into_iter()
                    .nth(*index)
                    .ok_or(ResolutionErrorKind::IndexOutOfRange {
                        index: *index,
                        len: table.len(),
                    }),
                other => Err(ResolutionErrorKind::UnknownAttribute {
                    attribute: format!("[{}]", index),
                    kind: other.kind(),
                }),
            },
        }
    }
}
