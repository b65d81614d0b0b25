//! The usable action port: a pluggable unit of work a step invokes via `use`.
//!
//! Actions receive an [`ActionContext`] carrying the step's inherited
//! environment, a scope snapshot, the interpolated `with` parameters, an
//! output sink, and a cancellation token that is their stop signal. They may
//! run sub-commands through the step's execution engine with
//! [`ActionContext::run_command`].

use std::future::Future;
use std::path::PathBuf;

use cadence_types::definition::Environment;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::engine::{CommandExit, CommandRequest, OutputSink};
use crate::workflow::context::ResolvedTarget;

/// How an action ended unsuccessfully.
///
/// Mirrors the step outcomes: `Failed` -> Failure, `Setup` -> Error,
/// `Stopped` -> Stopped.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ActionError {
    #[error("{0}")]
    Failed(String),

    #[error("{0}")]
    Setup(String),

    #[error("Action was stopped")]
    Stopped,
}

/// Everything an action sees while running.
#[derive(Debug, Clone)]
pub struct ActionContext {
    pub environment: Environment,
    /// Snapshot of the scope (`variables`, `outputs`, `environment`, `strategy`).
    pub scope: Value,
    /// Resolved target name.
    pub target: Option<String>,
    /// `with` parameters, string leaves already interpolated.
    pub with: Value,
    pub working_directory: Option<PathBuf>,
    pub sink: OutputSink,
    pub cancel: CancellationToken,
    engine: Result<ResolvedTarget, String>,
}

impl ActionContext {
    /// Look up one `with` parameter.
    pub fn param(&self, key: &str) -> Option<&Value> {
        self.with.get(key)
    }

    /// Look up a string `with` parameter.
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.param(key).and_then(Value::as_str)
    }

    /// Stream a line of output as if the action printed it.
    pub fn print(&self, chunk: &str) {
        self.sink.stdout(chunk);
    }

    /// Run a command through the step's execution engine.
    ///
    /// Output streams into this action's sink. A stop request reaches the
    /// command through a child of the action's token.
    pub async fn run_command(&self, command: &str) -> Result<CommandExit, ActionError> {
        let target = self.engine.as_ref().map_err(|e| ActionError::Setup(e.clone()))?;
        let request = CommandRequest {
            command: command.to_string(),
            environment: self.environment.clone(),
            working_directory: self.working_directory.clone(),
            input: None,
            options: target.options.clone(),
        };
        let exit = target
            .engine
            .run(request, self.sink.clone(), self.cancel.child_token())
            .await
            .map_err(|e| ActionError::Failed(e.to_string()))?;
        if exit.stopped {
            return Err(ActionError::Stopped);
        }
        Ok(exit)
    }

    /// A context with no engine, empty environment, and empty scope.
    pub fn new(with: Value) -> Self {
        Self {
            environment: Environment::new(),
            scope: Value::Object(Default::default()),
            target: None,
            with,
            working_directory: None,
            sink: OutputSink::detached(),
            cancel: CancellationToken::new(),
            engine: Err("No execution engine is available to this action".to_string()),
        }
    }

    pub fn with_engine(mut self, target: ResolvedTarget) -> Self {
        self.target = Some(target.name.clone());
        self.engine = Ok(target);
        self
    }

    pub(crate) fn with_engine_result(mut self, target: Result<ResolvedTarget, String>) -> Self {
        match target {
            Ok(target) => self.with_engine(target),
            Err(message) => {
                self.engine = Err(message);
                self
            }
        }
    }
}

/// A pluggable unit of work.
///
/// Uses RPITIT for the async method; see [`super::box_action::BoxAction`]
/// for the object-safe wrapper stored in the registry.
pub trait UsableAction: Send + Sync {
    /// Name steps refer to with `use` (matched case-insensitively).
    fn name(&self) -> &str;

    /// Run to completion.
    ///
    /// `Ok(Some(value))` sets the step's structured output; `Ok(None)` makes
    /// the step output whatever the action printed.
    fn run(
        &self,
        ctx: &ActionContext,
    ) -> impl Future<Output = Result<Option<Value>, ActionError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptEngine;
    use serde_json::json;

    #[tokio::test]
    async fn run_command_streams_into_action_sink() {
        let ctx = ActionContext::new(json!({})).with_engine(ScriptEngine::new().target());
        let exit = ctx.run_command("echo nested").await.unwrap();
        assert!(exit.success());
        assert_eq!(ctx.sink.stdout_text(), "nested\n");
    }

    #[tokio::test]
    async fn run_command_without_engine_is_setup_error() {
        let ctx = ActionContext::new(json!({}))
            .with_engine_result(Err("Target \"x\" is not defined".into()));
        let err = ctx.run_command("echo nope").await.unwrap_err();
        assert_eq!(err, ActionError::Setup("Target \"x\" is not defined".into()));
    }

    #[tokio::test]
    async fn run_command_reports_stop() {
        let ctx = ActionContext::new(json!({})).with_engine(ScriptEngine::new().target());
        ctx.cancel.cancel();
        let err = ctx.run_command("sleep 5000").await.unwrap_err();
        assert_eq!(err, ActionError::Stopped);
    }

    #[test]
    fn params_are_read_from_with() {
        let ctx = ActionContext::new(json!({"seconds": 2, "name": "x"}));
        assert_eq!(ctx.param("seconds"), Some(&json!(2)));
        assert_eq!(ctx.param_str("name"), Some("x"));
        assert!(ctx.param("missing").is_none());
    }
}
