//! The `${...}` reference language
//!
//! References reach into pipeline variables (`var.NAME`), named connections
//! (`conn.NAME`) and the outputs or arguments of earlier steps
//! (`steps['NAME'].output.ATTR`). A field holding exactly one reference
//! resolves to the referenced value itself; a reference embedded in other
//! text is rendered into the surrounding string.

pub mod parser;
pub mod resolver;

pub use parser::{Accessor, Expression, ParseError, Reference, Root, Template};
pub use resolver::{ExpressionResolver, FieldPath};

use crate::core::error::{ResolutionError, ResolutionErrorKind};
use crate::core::value::Value;

/// Collect every reference in a nested value without evaluating anything
pub fn collect_references(
    value: &Value,
    field: &FieldPath,
    out: &mut Vec<(Expression, FieldPath)>,
) -> Result<(), ResolutionError> {
    match value {
        Value::Str(text) => {
            let template = Template::parse(text).map_err(|e| ResolutionError {
                expression: e.expression,
                field: field.to_string(),
                kind: ResolutionErrorKind::InvalidExpression(e.reason),
            })?;
            out.extend(
                template
                    .expressions()
                    .into_iter()
                    .map(|expr| (expr.clone(), field.clone())),
            );
        }
        Value::List(items) => {
            for (i, item) in items.iter().enumerate() {
                collect_references(item, &field.index(i), out)?;
            }
        }
        Value::Map(map) => {
            for (key, item) in map {
                collect_references(item, &field.key(key), out)?;
            }
        }
        _ => {}
    }
    Ok(())
}
