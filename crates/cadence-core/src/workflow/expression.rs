//! Expression evaluation for conditions, command interpolation, and dynamic
//! strategy sources.
//!
//! The engine talks to an [`ExpressionEvaluator`]; [`JexlEvaluator`] is the
//! default implementation, backed by `jexl_eval` with a small set of string
//! and collection transforms.
//!
//! Scope values are always passed as the evaluation context, never spliced
//! into expression strings.

use cadence_types::definition::Condition;
use serde_json::{json, Value};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur during expression evaluation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExpressionError {
    #[error("Expression evaluation failed: {0}")]
    EvalFailed(String),

    #[error("Unterminated placeholder starting at byte {0}")]
    Unterminated(usize),

    #[error("Invalid context: {0}")]
    InvalidContext(String),
}

// ---------------------------------------------------------------------------
// ExpressionEvaluator
// ---------------------------------------------------------------------------

/// Placeholder delimiters recognized by [`ExpressionEvaluator::interpolate`].
const DELIMITERS: [(&str, &str); 2] = [("${{", "}}"), ("$<<", ">>")];

/// Evaluates expressions against a JSON scope object.
pub trait ExpressionEvaluator: Send + Sync {
    /// Evaluate a bare expression (no `${{ }}` wrapper) to a value.
    fn evaluate(&self, expression: &str, scope: &Value) -> Result<Value, ExpressionError>;

    /// Replace every `${{ expr }}` / `$<< expr >>` placeholder in `template`
    /// with the string form of the evaluated expression.
    fn interpolate(&self, template: &str, scope: &Value) -> Result<String, ExpressionError> {
        let mut result = String::with_capacity(template.len());
        let mut rest = template;
        let mut offset = 0;

        loop {
            let next = DELIMITERS
                .iter()
                .filter_map(|(open, close)| rest.find(open).map(|pos| (pos, *open, *close)))
                .min_by_key(|(pos, _, _)| *pos);

            let Some((pos, open, close)) = next else {
                result.push_str(rest);
                return Ok(result);
            };

            result.push_str(&rest[..pos]);
            let body_start = pos + open.len();
            let body_len = rest[body_start..]
                .find(close)
                .ok_or(ExpressionError::Unterminated(offset + pos))?;
            let expression = rest[body_start..body_start + body_len].trim();
            let value = self.evaluate(expression, scope)?;
            result.push_str(&value_to_string(&value));

            let consumed = body_start + body_len + close.len();
            offset += consumed;
            rest = &rest[consumed..];
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Strip a `${{ }}` or `$<< >>` wrapper enclosing the whole string.
pub fn expression_body(source: &str) -> &str {
    let trimmed = source.trim();
    for (open, close) in DELIMITERS {
        if let Some(inner) = trimmed
            .strip_prefix(open)
            .and_then(|s| s.strip_suffix(close))
        {
            // `${{ a }} and ${{ b }}` is two placeholders, not one wrapper.
            if !inner.contains(open) {
                return inner.trim();
            }
        }
    }
    trimmed
}

/// Evaluate an expression source that may be wrapped in a placeholder.
pub fn evaluate_source(
    evaluator: &dyn ExpressionEvaluator,
    source: &str,
    scope: &Value,
) -> Result<Value, ExpressionError> {
    evaluator.evaluate(expression_body(source), scope)
}

/// Resolve an `if`/`unless` condition to a boolean.
pub fn evaluate_condition(
    evaluator: &dyn ExpressionEvaluator,
    condition: &Condition,
    scope: &Value,
) -> Result<bool, ExpressionError> {
    match condition {
        Condition::Literal(b) => Ok(*b),
        Condition::Expression(source) => {
            evaluate_source(evaluator, source, scope).map(|v| is_truthy(&v))
        }
    }
}

/// Whether `if`/`unless` say the unit of work should be skipped.
pub fn should_skip(
    evaluator: &dyn ExpressionEvaluator,
    if_: Option<&Condition>,
    unless: Option<&Condition>,
    scope: &Value,
) -> Result<bool, ExpressionError> {
    if let Some(condition) = if_ {
        if !evaluate_condition(evaluator, condition, scope)? {
            return Ok(true);
        }
    }
    if let Some(condition) = unless {
        if evaluate_condition(evaluator, condition, scope)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Interpolate every string leaf of a JSON value.
pub fn interpolate_value(
    evaluator: &dyn ExpressionEvaluator,
    value: &Value,
    scope: &Value,
) -> Result<Value, ExpressionError> {
    Ok(match value {
        Value::String(s) => Value::String(evaluator.interpolate(s, scope)?),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| interpolate_value(evaluator, v, scope))
                .collect::<Result<_, _>>()?,
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), interpolate_value(evaluator, v, scope)?)))
                .collect::<Result<_, ExpressionError>>()?,
        ),
        other => other.clone(),
    })
}

/// JavaScript-like truthiness.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Convert a JSON value to its interpolated string form.
///
/// Strings are inserted bare, null becomes empty, whole floats lose their
/// fractional part, and everything else is compact JSON.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < 1e15 => {
                format!("{}", f as i64)
            }
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// JexlEvaluator
// ---------------------------------------------------------------------------

/// JEXL evaluator with standard transforms registered.
///
/// Transforms: `lower`, `upper`, `trim`, `split`, `join`, `not`, `contains`,
/// `startsWith`, `endsWith`, `length`, `keys`, `json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JexlEvaluator;

impl JexlEvaluator {
    pub fn new() -> Self {
        Self
    }

    fn build() -> jexl_eval::Evaluator<'static> {
        jexl_eval::Evaluator::new()
            .with_transform("lower", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.to_lowercase()))
            })
            .with_transform("upper", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.to_uppercase()))
            })
            .with_transform("trim", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.trim()))
            })
            .with_transform("split", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                let delimiter = args.get(1).and_then(|v| v.as_str()).unwrap_or(",");
                let parts: Vec<&str> = s.split(delimiter).collect();
                Ok(json!(parts))
            })
            .with_transform("join", |args: &[Value]| {
                let separator = args.get(1).and_then(|v| v.as_str()).unwrap_or(",");
                let joined = args
                    .first()
                    .and_then(|v| v.as_array())
                    .map(|items| {
                        items
                            .iter()
                            .map(value_to_string)
                            .collect::<Vec<_>>()
                            .join(separator)
                    })
                    .unwrap_or_default();
                Ok(json!(joined))
            })
            .with_transform("not", |args: &[Value]| {
                let val = args.first().cloned().unwrap_or(Value::Null);
                Ok(json!(!is_truthy(&val)))
            })
            .with_transform("contains", |args: &[Value]| {
                let found = match (args.first(), args.get(1)) {
                    (Some(Value::String(s)), Some(Value::String(needle))) => s.contains(needle.as_str()),
                    (Some(Value::Array(items)), Some(needle)) => items.contains(needle),
                    _ => false,
                };
                Ok(json!(found))
            })
            .with_transform("startsWith", |args: &[Value]| {
                let subject = args.first().and_then(|v| v.as_str()).unwrap_or("");
                let prefix = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(subject.starts_with(prefix)))
            })
            .with_transform("endsWith", |args: &[Value]| {
                let subject = args.first().and_then(|v| v.as_str()).unwrap_or("");
                let suffix = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(subject.ends_with(suffix)))
            })
            .with_transform("length", |args: &[Value]| {
                let len = match args.first() {
                    Some(Value::String(s)) => s.chars().count(),
                    Some(Value::Array(a)) => a.len(),
                    Some(Value::Object(o)) => o.len(),
                    _ => 0,
                };
                Ok(json!(len as f64))
            })
            .with_transform("keys", |args: &[Value]| {
                let keys: Vec<String> = args
                    .first()
                    .and_then(|v| v.as_object())
                    .map(|o| o.keys().cloned().collect())
                    .unwrap_or_default();
                Ok(json!(keys))
            })
            .with_transform("json", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("null");
                Ok(serde_json::from_str::<Value>(s).unwrap_or(Value::Null))
            })
    }
}

impl ExpressionEvaluator for JexlEvaluator {
    fn evaluate(&self, expression: &str, scope: &Value) -> Result<Value, ExpressionError> {
        if !scope.is_object() {
            return Err(ExpressionError::InvalidContext(
                "scope must be a JSON object".to_string(),
            ));
        }
        Self::build()
            .eval_in_context(expression, scope)
            .map_err(|e| ExpressionError::EvalFailed(format!("{expression}: {e}")))
    }
}
