//! Shared run state: the scope, inherited settings, and the run context.
//!
//! `Scope` is the variable/output object every expression sees. It is shared
//! by reference across the whole run; only the routine that owns a named
//! step writes that step's output, and dependents cannot start until their
//! dependencies finished writing.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use cadence_types::definition::{Environment, TargetDefinition};
use dashmap::DashMap;
use indexmap::IndexMap;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::action::ActionRegistry;
use crate::engine::{BoxEngine, EngineRegistry, DEFAULT_ENGINE};
use crate::event::bus::EventBus;

use super::expression::ExpressionEvaluator;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum size of a single recorded step output (1 MB).
pub const MAX_STEP_OUTPUT_SIZE: usize = 1_048_576;

// ---------------------------------------------------------------------------
// Scope
// ---------------------------------------------------------------------------

/// Variables, environment, and recorded step outputs for one run.
///
/// Cloning shares the output table.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    variables: Arc<Map<String, Value>>,
    environment: Arc<Environment>,
    outputs: Arc<DashMap<String, Map<String, Value>>>,
}

impl Scope {
    pub fn new(variables: Map<String, Value>, environment: Environment) -> Self {
        Self {
            variables: Arc::new(variables),
            environment: Arc::new(environment),
            outputs: Arc::new(DashMap::new()),
        }
    }

    /// Record `outputs[routine][step] = output`.
    ///
    /// Outputs larger than `MAX_STEP_OUTPUT_SIZE` once serialized are
    /// replaced with a truncation marker.
    pub fn record_output(&self, routine: &str, step: &str, output: Value) {
        let size = match &output {
            Value::String(s) => s.len(),
            other => serde_json::to_string(other).map(|s| s.len()).unwrap_or(0),
        };

        let output = if size > MAX_STEP_OUTPUT_SIZE {
            tracing::warn!(
                routine,
                step,
                size,
                max = MAX_STEP_OUTPUT_SIZE,
                "step output exceeds size limit, truncating"
            );
            json!({
                "_truncated": true,
                "_original_size": size,
                "_message": format!(
                    "output exceeded {MAX_STEP_OUTPUT_SIZE} byte limit and was truncated"
                ),
            })
        } else {
            output
        };

        self.outputs
            .entry(routine.to_string())
            .or_default()
            .insert(step.to_string(), output);
    }

    /// Read back a recorded output.
    pub fn output(&self, routine: &str, step: &str) -> Option<Value> {
        self.outputs
            .get(routine)
            .and_then(|steps| steps.get(step).cloned())
    }

    pub fn variables(&self) -> &Map<String, Value> {
        &self.variables
    }

    /// Build the JSON object expressions evaluate against.
    ///
    /// Shape:
    /// ```json
    /// {
    ///   "variables": { ... },
    ///   "environment": { ... },
    ///   "outputs": { "<routine>": { "<step>": <output> } },
    ///   "strategy": { "<key>": <value>, "index": 0 }
    /// }
    /// ```
    /// `strategy` is present only for strategy members.
    pub fn to_value(&self, strategy: Option<&Value>) -> Value {
        let outputs: Map<String, Value> = self
            .outputs
            .iter()
            .map(|entry| (entry.key().clone(), Value::Object(entry.value().clone())))
            .collect();
        let environment: Map<String, Value> = self
            .environment
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();

        let mut scope = Map::new();
        scope.insert("variables".into(), Value::Object((*self.variables).clone()));
        scope.insert("environment".into(), Value::Object(environment));
        scope.insert("outputs".into(), Value::Object(outputs));
        if let Some(strategy) = strategy {
            scope.insert("strategy".into(), strategy.clone());
        }
        Value::Object(scope)
    }
}

// ---------------------------------------------------------------------------
// Inherited settings
// ---------------------------------------------------------------------------

/// Environment, target, and working directory resolved by
/// step > routine > workflow precedence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Inherited {
    pub environment: Environment,
    pub target: Option<String>,
    pub working_directory: Option<PathBuf>,
}

impl Inherited {
    /// Layer a more specific level on top of this one.
    ///
    /// Environment keys override, the target replaces, and a relative
    /// working directory resolves against the inherited one.
    pub fn child(
        &self,
        environment: &Environment,
        target: Option<&str>,
        working_directory: Option<&str>,
    ) -> Self {
        let mut merged = self.environment.clone();
        merged.extend(environment.iter().map(|(k, v)| (k.clone(), v.clone())));

        let working_directory = match (working_directory, &self.working_directory) {
            (Some(dir), Some(parent)) => Some(parent.join(dir)),
            (Some(dir), None) => Some(Path::new(dir).to_path_buf()),
            (None, parent) => parent.clone(),
        };

        Self {
            environment: merged,
            target: target.map(str::to_string).or_else(|| self.target.clone()),
            working_directory,
        }
    }
}

// ---------------------------------------------------------------------------
// RunContext
// ---------------------------------------------------------------------------

/// An execution target resolved to a concrete engine.
#[derive(Debug, Clone)]
pub struct ResolvedTarget {
    pub name: String,
    pub engine: Arc<BoxEngine>,
    pub options: Option<Value>,
}

/// Collaborators and shared state for one workflow run.
pub struct RunContext {
    pub run_id: Uuid,
    pub scope: Scope,
    pub evaluator: Arc<dyn ExpressionEvaluator>,
    pub engines: EngineRegistry,
    pub actions: ActionRegistry,
    pub events: EventBus,
    pub targets: IndexMap<String, TargetDefinition>,
}

impl RunContext {
    /// Resolve a target name (None = the implicit `local` target).
    ///
    /// Errors are setup faults, reported as the failing unit's error message.
    pub fn resolve_target(&self, target: Option<&str>) -> Result<ResolvedTarget, String> {
        let name = target.unwrap_or(DEFAULT_ENGINE);
        let (engine_name, options) = match self.targets.get(name) {
            Some(def) => (def.engine.as_str(), def.engine_options.clone()),
            None if name == DEFAULT_ENGINE => (DEFAULT_ENGINE, None),
            None => return Err(format!("Target \"{name}\" is not defined")),
        };

        let engine = self
            .engines
            .get(engine_name)
            .ok_or_else(|| format!("No execution engine named \"{engine_name}\" is registered"))?;

        Ok(ResolvedTarget {
            name: name.to_string(),
            engine,
            options,
        })
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("run_id", &self.run_id)
            .field("engines", &self.engines.list_names())
            .field("actions", &self.actions.list_names())
            .field("targets", &self.targets.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{run_context, ScriptEngine};

    #[test]
    fn record_and_read_output() {
        let scope = Scope::default();
        scope.record_output("build", "compile", json!("ok"));
        assert_eq!(scope.output("build", "compile"), Some(json!("ok")));
        assert_eq!(scope.output("build", "missing"), None);

        let value = scope.to_value(None);
        assert_eq!(value["outputs"]["build"]["compile"], "ok");
        assert!(value.get("strategy").is_none());
    }

    #[test]
    fn oversized_output_is_truncated() {
        let scope = Scope::default();
        scope.record_output("r", "s", json!("x".repeat(MAX_STEP_OUTPUT_SIZE + 1)));
        let recorded = scope.output("r", "s").unwrap();
        assert_eq!(recorded["_truncated"], true);
        assert_eq!(recorded["_original_size"], MAX_STEP_OUTPUT_SIZE + 1);
    }

    #[test]
    fn scope_value_includes_variables_environment_and_strategy() {
        let mut vars = Map::new();
        vars.insert("greeting".into(), json!("hi"));
        let mut env = Environment::new();
        env.insert("CI".into(), "true".into());
        let scope = Scope::new(vars, env);

        let value = scope.to_value(Some(&json!({"os": "linux", "index": 1})));
        assert_eq!(value["variables"]["greeting"], "hi");
        assert_eq!(value["environment"]["CI"], "true");
        assert_eq!(value["strategy"]["os"], "linux");
        assert_eq!(value["strategy"]["index"], 1);
    }

    #[test]
    fn inherited_settings_layer_by_precedence() {
        let mut workflow_env = Environment::new();
        workflow_env.insert("A".into(), "workflow".into());
        workflow_env.insert("B".into(), "workflow".into());
        let workflow = Inherited {
            environment: workflow_env,
            target: Some("remote".into()),
            working_directory: Some(PathBuf::from("/srv")),
        };

        let mut routine_env = Environment::new();
        routine_env.insert("B".into(), "routine".into());
        let routine = workflow.child(&routine_env, None, Some("app"));

        let mut step_env = Environment::new();
        step_env.insert("A".into(), "step".into());
        let step = routine.child(&step_env, Some("local"), Some("/tmp"));

        assert_eq!(routine.target.as_deref(), Some("remote"));
        assert_eq!(routine.working_directory, Some(PathBuf::from("/srv/app")));
        assert_eq!(step.environment["A"], "step");
        assert_eq!(step.environment["B"], "routine");
        assert_eq!(step.target.as_deref(), Some("local"));
        assert_eq!(step.working_directory, Some(PathBuf::from("/tmp")));
    }

    #[test]
    fn resolve_target_defaults_to_local_engine() {
        let ctx = run_context(ScriptEngine::new(), IndexMap::new());
        let target = ctx.resolve_target(None).unwrap();
        assert_eq!(target.name, "local");
        assert_eq!(target.engine.name(), "local");
        assert!(target.options.is_none());
    }

    #[test]
    fn resolve_target_uses_declared_engine_and_options() {
        let mut targets = IndexMap::new();
        targets.insert(
            "box".to_string(),
            TargetDefinition {
                engine: "local".into(),
                engine_options: Some(json!({"image": "alpine"})),
            },
        );
        let ctx = run_context(ScriptEngine::new(), targets);
        let target = ctx.resolve_target(Some("box")).unwrap();
        assert_eq!(target.name, "box");
        assert_eq!(target.options, Some(json!({"image": "alpine"})));
    }

    #[test]
    fn resolve_target_errors() {
        let mut targets = IndexMap::new();
        targets.insert(
            "remote".to_string(),
            TargetDefinition {
                engine: "ssh".into(),
                engine_options: None,
            },
        );
        let ctx = run_context(ScriptEngine::new(), targets);
        assert_eq!(
            ctx.resolve_target(Some("nowhere")).unwrap_err(),
            "Target \"nowhere\" is not defined"
        );
        assert_eq!(
            ctx.resolve_target(Some("remote")).unwrap_err(),
            "No execution engine named \"ssh\" is registered"
        );
    }
}
