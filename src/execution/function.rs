//! Function resolution - turns a step's `function` into something invokable

use crate::catalog::{Capability, OperationCatalog};
use crate::core::error::FunctionResolutionError;
use crate::core::value::{Callable, Value};

/// Resolves free operations by dotted path and capabilities on values
pub struct FunctionResolver<'a> {
    catalog: &'a OperationCatalog,
}

impl<'a> FunctionResolver<'a> {
    pub fn new(catalog: &'a OperationCatalog) -> Self {
        Self { catalog }
    }

    /// A free operation such as `math.add`
    pub fn resolve_path(&self, path: &str) -> Result<Callable, FunctionResolutionError> {
        let operation = self.catalog.resolve(path)?;
        Ok(Callable::free(path, operation))
    }

    /// Look up `attribute` on `receiver` and bind it
    pub fn resolve_bound(
        &self,
        receiver: Value,
        attribute: &str,
    ) -> Result<Callable, FunctionResolutionError> {
        match self.catalog.capability(&receiver, attribute) {
            Capability::Method(operation) => Ok(Callable::bound(attribute, operation, receiver)),
            // A mapping entry holding a callable
            Capability::Attribute(Value::Callable(callable)) => Ok(callable),
            Capability::Attribute(_) => Err(FunctionResolutionError::NotCallable {
                target: format!("{}.{}", receiver.kind(), attribute),
            }),
            Capability::Missing => Err(FunctionResolutionError::AttributeNotFound {
                attribute: attribute.to_string(),
                kind: receiver.kind(),
            }),
        }
    }

    /// An already-resolved `function` expression: a callable is used as is
    /// and text is treated as a dotted path
    pub fn resolve_value(
        &self,
        value: Value,
        reference: &str,
    ) -> Result<Callable, FunctionResolutionError> {
        match value {
            Value::Callable(callable) => Ok(callable),
            Value::Str(path) => self.resolve_path(path.trim()),
            _ => Err(FunctionResolutionError::NotCallable {
                target: reference.to_string(),
            }),
        }
    }
}
