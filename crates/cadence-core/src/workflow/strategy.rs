//! Matrix/include expansion.
//!
//! A matrix expands to the cartesian product of its value lists, in
//! row-major order. Each include entry then merges into every original
//! combination it does not contradict; an entry that contradicts all of them
//! becomes a standalone combination appended at the end. Standalone entries
//! are never matched by later include entries.

use cadence_types::definition::{IncludeSource, MatrixSource, StrategyDefinition};
use indexmap::IndexMap;
use serde_json::{Map, Value};

use super::expression::{evaluate_source, ExpressionError, ExpressionEvaluator};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StrategyError {
    #[error("Strategy requires at least a matrix or include option")]
    Empty,

    #[error("Strategy matrix must evaluate to an object")]
    MatrixNotObject,

    #[error("Strategy matrix value for \"{0}\" must be an array")]
    MatrixValueNotArray(String),

    #[error("Strategy include must evaluate to an array of objects")]
    IncludeNotArray,

    #[error(transparent)]
    Expression(#[from] ExpressionError),
}

/// One expanded combination.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyCombination {
    pub index: usize,
    pub variables: Map<String, Value>,
}

impl StrategyCombination {
    /// Display name of the member routine.
    pub fn routine_name(&self, routine: &str) -> String {
        member_name(routine, self.index)
    }

    /// The `strategy` scope key: the variables plus `index`.
    pub fn scope_value(&self) -> Value {
        let mut value = self.variables.clone();
        value.insert("index".into(), Value::from(self.index));
        Value::Object(value)
    }
}

pub fn member_name(routine: &str, index: usize) -> String {
    format!("{routine} [{index}]")
}

/// Expand a strategy, evaluating expression sources against `scope`.
pub fn expand_strategy(
    definition: &StrategyDefinition,
    evaluator: &dyn ExpressionEvaluator,
    scope: &Value,
) -> Result<Vec<StrategyCombination>, StrategyError> {
    if definition.matrix.is_none() && definition.include.is_none() {
        return Err(StrategyError::Empty);
    }

    let matrix = match &definition.matrix {
        None => None,
        Some(MatrixSource::Static(matrix)) => Some(matrix.clone()),
        Some(MatrixSource::Expression(source)) => {
            Some(matrix_from_value(evaluate_source(evaluator, source, scope)?)?)
        }
    };
    let include = match &definition.include {
        None => Vec::new(),
        Some(IncludeSource::Static(entries)) => entries.clone(),
        Some(IncludeSource::Expression(source)) => {
            include_from_value(evaluate_source(evaluator, source, scope)?)?
        }
    };

    Ok(combine(matrix.as_ref(), &include))
}

/// Expand a strategy with literal sources only.
///
/// Returns `Ok(None)` when a source is an expression and expansion has to
/// wait for the run.
pub fn expand_static(
    definition: &StrategyDefinition,
) -> Result<Option<Vec<StrategyCombination>>, StrategyError> {
    if definition.matrix.is_none() && definition.include.is_none() {
        return Err(StrategyError::Empty);
    }
    if definition.is_dynamic() {
        return Ok(None);
    }
    let matrix = match &definition.matrix {
        Some(MatrixSource::Static(matrix)) => Some(matrix),
        _ => None,
    };
    let include: &[Map<String, Value>] = match &definition.include {
        Some(IncludeSource::Static(entries)) => entries,
        _ => &[],
    };
    Ok(Some(combine(matrix, include)))
}

fn matrix_from_value(value: Value) -> Result<IndexMap<String, Vec<Value>>, StrategyError> {
    let Value::Object(object) = value else {
        return Err(StrategyError::MatrixNotObject);
    };
    object
        .into_iter()
        .map(|(key, values)| match values {
            Value::Array(values) => Ok((key, values)),
            _ => Err(StrategyError::MatrixValueNotArray(key)),
        })
        .collect()
}

fn include_from_value(value: Value) -> Result<Vec<Map<String, Value>>, StrategyError> {
    let Value::Array(entries) = value else {
        return Err(StrategyError::IncludeNotArray);
    };
    entries
        .into_iter()
        .map(|entry| match entry {
            Value::Object(entry) => Ok(entry),
            _ => Err(StrategyError::IncludeNotArray),
        })
        .collect()
}

/// Original combination: its matrix-derived keys, and the merged result.
struct Combination {
    original: Map<String, Value>,
    merged: Map<String, Value>,
}

fn combine(
    matrix: Option<&IndexMap<String, Vec<Value>>>,
    include: &[Map<String, Value>],
) -> Vec<StrategyCombination> {
    let mut originals: Vec<Combination> = matrix
        .map(cartesian_product)
        .unwrap_or_default()
        .into_iter()
        .map(|original| Combination {
            merged: original.clone(),
            original,
        })
        .collect();
    let mut extras: Vec<Map<String, Value>> = Vec::new();

    for entry in include {
        let mut matched = false;
        for combination in originals.iter_mut() {
            let contradicts = entry.iter().any(|(key, value)| {
                combination
                    .original
                    .get(key)
                    .is_some_and(|existing| existing != value)
            });
            if !contradicts {
                matched = true;
                combination
                    .merged
                    .extend(entry.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        }
        if !matched {
            extras.push(entry.clone());
        }
    }

    originals
        .into_iter()
        .map(|c| c.merged)
        .chain(extras)
        .enumerate()
        .map(|(index, variables)| StrategyCombination { index, variables })
        .collect()
}

/// Row-major cartesian product: the last key varies fastest.
fn cartesian_product(matrix: &IndexMap<String, Vec<Value>>) -> Vec<Map<String, Value>> {
    if matrix.is_empty() {
        return Vec::new();
    }
    let mut products = vec![Map::new()];
    for (key, values) in matrix {
        products = products
            .iter()
            .flat_map(|product| {
                values.iter().map(move |value| {
                    let mut next = product.clone();
                    next.insert(key.clone(), value.clone());
                    next
                })
            })
            .collect();
    }
    products
}
