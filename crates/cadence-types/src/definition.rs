//! Workflow descriptor types.
//!
//! `WorkflowDefinition` is the structural contract the engine consumes. It is
//! usually loaded from YAML:
//!
//! ```yaml
//! variables:
//!   greeting: hello
//! routines:
//!   build:
//!     steps:
//!       - name: compile
//!         run: echo ${{ variables.greeting }}
//!   test:
//!     dependsOn: build
//!     strategy:
//!       matrix:
//!         os: [linux, macos]
//!     steps:
//!       - run: echo ${{ strategy.os }}
//! ```

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Environment variables, in declaration order.
pub type Environment = IndexMap<String, String>;

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// Top-level workflow descriptor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    /// Routines keyed by name. Declaration order is preserved and decides
    /// queue order among routines that become ready together.
    #[serde(default)]
    pub routines: IndexMap<String, RoutineDefinition>,
    #[serde(
        default,
        deserialize_with = "deserialize_environment",
        skip_serializing_if = "IndexMap::is_empty"
    )]
    pub environment: Environment,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Named execution targets.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub targets: IndexMap<String, TargetDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
    /// User variables, visible to expressions as `variables.<name>`.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub variables: Map<String, Value>,
    /// Cap on simultaneously running routines (None = derive from CPU count).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent_routines: Option<usize>,
}

/// A named execution target: which engine runs commands, and its options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetDefinition {
    pub engine: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine_options: Option<Value>,
}

// ---------------------------------------------------------------------------
// Routine
// ---------------------------------------------------------------------------

/// A named, ordered sequence of steps.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutineDefinition {
    #[serde(default)]
    pub steps: Vec<StepDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<StrategyDefinition>,
    /// Routine names this routine waits for. Accepts a single string or a list.
    #[serde(
        default,
        deserialize_with = "deserialize_one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub depends_on: Vec<String>,
    #[serde(default, rename = "if", skip_serializing_if = "Option::is_none")]
    pub if_: Option<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unless: Option<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_failure: Option<OnFailure>,
    #[serde(
        default,
        deserialize_with = "deserialize_environment",
        skip_serializing_if = "IndexMap::is_empty"
    )]
    pub environment: Environment,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
}

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

/// One unit of work: a command (`run`) or a usable action (`use`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDefinition {
    /// Optional name. Named steps have their output recorded in scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Command template, interpolated against scope before execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<String>,
    /// Usable action name (case-insensitive).
    #[serde(default, rename = "use", skip_serializing_if = "Option::is_none")]
    pub use_: Option<String>,
    /// Parameters for the usable action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub with: Option<Value>,
    #[serde(default, rename = "if", skip_serializing_if = "Option::is_none")]
    pub if_: Option<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unless: Option<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_failure: Option<OnFailure>,
    #[serde(
        default,
        deserialize_with = "deserialize_environment",
        skip_serializing_if = "IndexMap::is_empty"
    )]
    pub environment: Environment,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
    /// Text written to the command's stdin (interpolated).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
}

// ---------------------------------------------------------------------------
// Strategy
// ---------------------------------------------------------------------------

/// Matrix/include fan-out for a routine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matrix: Option<MatrixSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include: Option<IncludeSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_failure: Option<OnFailure>,
}

impl StrategyDefinition {
    /// True when either source must be evaluated at run time.
    pub fn is_dynamic(&self) -> bool {
        matches!(self.matrix, Some(MatrixSource::Expression(_)))
            || matches!(self.include, Some(IncludeSource::Expression(_)))
    }
}

/// A matrix given literally or as an expression evaluated at run time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MatrixSource {
    Expression(String),
    Static(IndexMap<String, Vec<Value>>),
}

/// Include entries given literally or as an expression evaluated at run time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IncludeSource {
    Expression(String),
    Static(Vec<Map<String, Value>>),
}

// ---------------------------------------------------------------------------
// Conditions and policies
// ---------------------------------------------------------------------------

/// An `if`/`unless` condition: a boolean literal or an expression string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Condition {
    Literal(bool),
    Expression(String),
}

/// What to do when a unit of work fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OnFailure {
    Continue,
    #[default]
    Fail,
}

impl OnFailure {
    /// Whether an optional policy tolerates failures.
    pub fn continues(policy: Option<OnFailure>) -> bool {
        matches!(policy, Some(OnFailure::Continue))
    }
}

// ---------------------------------------------------------------------------
// Serde helpers
// ---------------------------------------------------------------------------

fn deserialize_one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}

/// Accept scalar environment values (`PORT: 8080`, `DEBUG: true`) as strings.
fn deserialize_environment<'de, D>(deserializer: D) -> Result<Environment, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: IndexMap<String, Value> = IndexMap::deserialize(deserializer)?;
    raw.into_iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => s,
                Value::Null => String::new(),
                Value::Bool(_) | Value::Number(_) => value.to_string(),
                other => {
                    return Err(serde::de::Error::custom(format!(
                        "environment variable '{key}' must be a scalar, got {other}"
                    )));
                }
            };
            Ok((key, value))
        })
        .collect()
}
