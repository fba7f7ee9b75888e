//! Step registry - names, order and static reference checks
//!
//! Building the registry is a pure pass over the whole step list. It runs
//! before anything executes, so a badly named step or a reference to a
//! later step fails the pipeline without side effects.

use crate::core::error::{NamingError, PipelineError, ResolutionError, ResolutionErrorKind};
use crate::core::step::{FunctionSpec, NameSource, Step};
use crate::core::value::Value;
use crate::expression::{collect_references, Expression, FieldPath, Root};
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};

/// Validated steps in execution order
#[derive(Debug, Clone)]
pub struct StepRegistry {
    steps: Vec<Step>,
    positions: HashMap<String, usize>,
}

impl StepRegistry {
    /// Assign final names and validate every step expression
    ///
    /// `variables` and `connections` are the declared names a step may
    /// reference.
    pub fn build(
        mut steps: Vec<Step>,
        variables: &IndexMap<String, Value>,
        connections: &IndexMap<String, Value>,
    ) -> Result<Self, PipelineError> {
        let positions = assign_names(&mut steps)?;
        let registry = Self { steps, positions };

        for (index, step) in registry.steps.iter().enumerate() {
            for (expr, field) in step_references(index, step)? {
                registry.check_reference(index, &expr, &field, variables, connections)?;
            }
        }
        Ok(registry)
    }

    fn check_reference(
        &self,
        index: usize,
        expr: &Expression,
        field: &FieldPath,
        variables: &IndexMap<String, Value>,
        connections: &IndexMap<String, Value>,
    ) -> Result<(), ResolutionError> {
        let kind = match &expr.reference.root {
            Root::Variable(name) if !variables.contains_key(name) => {
                Some(ResolutionErrorKind::UnknownVariable(name.clone()))
            }
            Root::Connection(name) if !connections.contains_key(name) => {
                Some(ResolutionErrorKind::UnknownConnection(name.clone()))
            }
            Root::StepOutput(name) | Root::StepArgs(name) => match self.positions.get(name) {
                None => Some(ResolutionErrorKind::UnknownStep(name.clone())),
                Some(&position) if position >= index => {
                    Some(ResolutionErrorKind::ForwardReference(name.clone()))
                }
                Some(_) => None,
            },
            _ => None,
        };

        match kind {
            Some(kind) => Err(ResolutionError {
                expression: expr.text.clone(),
                field: field.to_string(),
                kind,
            }),
            None => Ok(()),
        }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Steps in document order, and the position of every name and alias
    pub fn into_parts(self) -> (Vec<Step>, HashMap<String, usize>) {
        (self.steps, self.positions)
    }
}

/// Reject duplicate explicit names and disambiguate derived ones
///
/// A derived name already taken by an explicit name, an alias or an earlier
/// derived step gets the first free `#k` suffix, counting from 2.
fn assign_names(steps: &mut [Step]) -> Result<HashMap<String, usize>, NamingError> {
    // Names the author wrote: explicit step names and every alias
    let mut explicit: HashMap<String, usize> = HashMap::new();
    for (index, step) in steps.iter().enumerate() {
        let names = match step.name_source {
            NameSource::Explicit => step.names().collect::<Vec<_>>(),
            NameSource::Derived => step.aliases.iter().map(String::as_str).collect(),
        };
        for name in names {
            if let Some(&first) = explicit.get(name) {
                return Err(NamingError::Duplicate {
                    name: name.to_string(),
                    first,
                    second: index,
                });
            }
            explicit.insert(name.to_string(), index);
        }
    }

    let mut derived: HashSet<String> = HashSet::new();
    for (index, step) in steps.iter_mut().enumerate() {
        if step.name_source != NameSource::Derived {
            continue;
        }
        let taken = |name: &str| derived.contains(name) || explicit.contains_key(name);
        if taken(step.name.as_str()) {
            // More candidates than taken names
            let limit = 2 + explicit.len() + derived.len();
            let base = step.name.clone();
            step.name = (2..=limit)
                .map(|ordinal| format!("{}#{}", base, ordinal))
                .find(|candidate| !taken(candidate.as_str()))
                .ok_or_else(|| NamingError::DerivedCollision {
                    name: base.clone(),
                    index,
                })?;
        }
        derived.insert(step.name.clone());
    }

    let mut positions = explicit;
    for (index, step) in steps.iter().enumerate() {
        positions.insert(step.name.clone(), index);
    }
    Ok(positions)
}

fn step_references(
    index: usize,
    step: &Step,
) -> Result<Vec<(Expression, FieldPath)>, ResolutionError> {
    let mut refs = Vec::new();
    match &step.function {
        FunctionSpec::Path(_) => {}
        FunctionSpec::Expression(text) => collect_references(
            &Value::Str(text.clone()),
            &FieldPath::step(index, "function"),
            &mut refs,
        )?,
        FunctionSpec::Bound { object, .. } => {
            collect_references(object, &FieldPath::step(index, "function.object"), &mut refs)?
        }
    }
    if let Some(args) = &step.args {
        collect_references(args, &FieldPath::step(index, "args"), &mut refs)?;
    }
    if let Some(save_progress) = &step.save_progress {
        collect_references(save_progress, &FieldPath::step(index, "saveProgress"), &mut refs)?;
    }
    Ok(refs)
}

/// Connection strings may only reference variables
pub fn validate_connections(
    connections: &IndexMap<String, Value>,
    variables: &IndexMap<String, Value>,
) -> Result<(), ResolutionError> {
    for (name, url) in connections {
        let field = FieldPath::new("connections").key(name);
        let mut refs = Vec::new();
        collect_references(url, &field, &mut refs)?;

        for (expr, field) in refs {
            let kind = match &expr.reference.root {
                Root::Variable(var) if variables.contains_key(var) => continue,
                Root::Variable(var) => ResolutionErrorKind::UnknownVariable(var.clone()),
                _ => ResolutionErrorKind::InvalidExpression(
                    "connection strings may only reference variables".to_string(),
                ),
            };
            return Err(ResolutionError {
                expression: expr.text,
                field: field.to_string(),
                kind,
            });
        }
    }
    Ok(())
}
