//! Step: one unit of work, dispatched to an execution engine (`run`) or a
//! usable action (`use`).
//!
//! Setup faults (interpolation errors, unknown targets, unknown actions) are
//! detected before the step enters Running and end it in `Error`. Once
//! running, a non-zero exit or an action failure ends it in `Failure`, and a
//! stop request ends it in `Stopped`.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use cadence_types::definition::StepDefinition;
use cadence_types::event::{RoutineRef, WorkflowEvent};
use cadence_types::graph::StepGraph;
use cadence_types::status::RunStatus;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::action::{ActionContext, ActionError};
use crate::engine::{CommandRequest, OutputSink};

use super::context::{Inherited, RunContext};
use super::expression::interpolate_value;
use super::lifecycle::{Lifecycle, Outcome, StopRequest};

/// How long a stopped action may take to wind down before it is dropped.
pub const ACTION_STOP_GRACE: Duration = Duration::from_secs(5);

const NOTHING_TO_RUN: &str = "Nothing to run, please provide either a run or use option";

#[derive(Debug, Default)]
struct StepDetail {
    command: Option<String>,
    output: Option<Value>,
}

/// Result of a step body, before it is applied to the lifecycle.
enum StepEnd {
    Success,
    Failure(String),
    Error(String),
    Stopped,
}

pub struct Step {
    index: usize,
    definition: StepDefinition,
    routine: RoutineRef,
    inherited: Inherited,
    ctx: Arc<RunContext>,
    lifecycle: Lifecycle,
    detail: Mutex<StepDetail>,
}

impl Step {
    /// `inherited` holds the routine-level settings; the step's own
    /// environment, target, and working directory are layered on top.
    pub fn new(
        index: usize,
        definition: StepDefinition,
        routine: RoutineRef,
        inherited: &Inherited,
        ctx: Arc<RunContext>,
        cancel: CancellationToken,
    ) -> Self {
        let inherited = inherited.child(
            &definition.environment,
            definition.target.as_deref(),
            definition.working_directory.as_deref(),
        );
        Self {
            index,
            definition,
            routine,
            inherited,
            ctx,
            lifecycle: Lifecycle::new(cancel),
            detail: Mutex::new(StepDetail::default()),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> Option<&str> {
        self.definition.name.as_deref()
    }

    pub fn definition(&self) -> &StepDefinition {
        &self.definition
    }

    pub fn status(&self) -> RunStatus {
        self.lifecycle.status()
    }

    /// Captured output: trimmed text for commands, or the action's value.
    pub fn output(&self) -> Option<Value> {
        self.detail
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .output
            .clone()
    }

    /// Interpolated command string (command steps only).
    pub fn command(&self) -> Option<String> {
        self.detail
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .command
            .clone()
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Run the step against a scope snapshot.
    pub async fn run(&self, scope: &Value) -> Outcome {
        if self.lifecycle.is_stop_requested() {
            return Outcome::not_started();
        }

        let end = if let Some(run) = self.definition.run.clone() {
            self.run_command(&run, scope).await
        } else if let Some(name) = self.definition.use_.clone() {
            self.run_action(&name, scope).await
        } else {
            Err(StepEnd::Error(NOTHING_TO_RUN.to_string()))
        };

        let end = match end {
            Ok(end) | Err(end) => end,
        };
        // Start refused: stop arrived during setup.
        if matches!(end, StepEnd::Stopped) && self.status() == RunStatus::Idle {
            return Outcome::not_started();
        }

        let (status, error) = match end {
            StepEnd::Success => (RunStatus::Success, None),
            StepEnd::Failure(e) => (RunStatus::Failure, Some(e)),
            StepEnd::Error(e) => (RunStatus::Error, Some(e)),
            StepEnd::Stopped => (RunStatus::Stopped, Some("Step was stopped".to_string())),
        };
        self.finish(status, error)
    }

    /// Mark the step skipped by its `if`/`unless` condition.
    pub fn skip(&self) {
        if self.lifecycle.transition(RunStatus::Skipped, None) {
            self.publish(RunStatus::Skipped, None);
        }
    }

    /// End the step in `Error` without running it.
    pub fn fail_setup(&self, message: String) -> Outcome {
        self.finish(RunStatus::Error, Some(message))
    }

    /// Stop the step, waiting for the in-flight command or action to wind down.
    ///
    /// A no-op when the step has not started or already finished.
    pub async fn stop(&self) {
        match self.lifecycle.request_stop() {
            StopRequest::Requested => {
                self.publish(RunStatus::Stopping, None);
                self.lifecycle.wait_terminal().await;
            }
            StopRequest::AlreadyStopping => {
                self.lifecycle.wait_terminal().await;
            }
            StopRequest::NotStarted | StopRequest::Finished => {}
        }
    }

    pub fn graph(&self) -> StepGraph {
        let snap = self.lifecycle.snapshot();
        let detail = self.detail.lock().unwrap_or_else(PoisonError::into_inner);
        StepGraph {
            index: self.index,
            name: self.definition.name.clone(),
            status: snap.status,
            timing: snap.timing(),
            error: snap.error.clone(),
            command: detail.command.clone(),
            output: detail.output.clone(),
        }
    }

    fn finish(&self, status: RunStatus, error: Option<String>) -> Outcome {
        match self.lifecycle.finish(status, error.clone()) {
            Some(reached) => {
                tracing::debug!(
                    routine = %self.routine.name,
                    step = self.index,
                    status = %reached,
                    "step finished"
                );
                self.publish(reached, error.clone());
                Outcome::new(reached, error)
            }
            None => {
                let snap = self.lifecycle.snapshot();
                Outcome::new(snap.status, snap.error)
            }
        }
    }

    fn start(&self) -> bool {
        let started = self.lifecycle.transition(RunStatus::Running, None);
        if started {
            self.publish(RunStatus::Running, None);
        }
        started
    }

    fn publish(&self, status: RunStatus, error: Option<String>) {
        self.ctx.events.publish(WorkflowEvent::Step {
            run_id: self.ctx.run_id,
            routine: self.routine.clone(),
            index: self.index,
            name: self.definition.name.clone(),
            status,
            error,
        });
    }

    fn set_output(&self, output: Value) {
        self.detail
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .output = Some(output);
    }

    fn sink(&self) -> OutputSink {
        OutputSink::attached(
            self.ctx.events.clone(),
            self.ctx.run_id,
            self.routine.clone(),
            self.index,
        )
    }

    // -----------------------------------------------------------------------
    // Command path
    // -----------------------------------------------------------------------

    async fn run_command(&self, template: &str, scope: &Value) -> Result<StepEnd, StepEnd> {
        let evaluator = self.ctx.evaluator.as_ref();
        let command = evaluator
            .interpolate(template, scope)
            .map_err(|e| StepEnd::Error(e.to_string()))?;
        let input = self
            .definition
            .input
            .as_deref()
            .map(|input| evaluator.interpolate(input, scope))
            .transpose()
            .map_err(|e| StepEnd::Error(e.to_string()))?;
        let target = self
            .ctx
            .resolve_target(self.inherited.target.as_deref())
            .map_err(StepEnd::Error)?;

        self.detail
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .command = Some(command.clone());

        if !self.start() {
            return Err(StepEnd::Stopped);
        }

        let request = CommandRequest {
            command,
            environment: self.inherited.environment.clone(),
            working_directory: self.inherited.working_directory.clone(),
            input,
            options: target.options.clone(),
        };
        let sink = self.sink();
        let cancel = self.lifecycle.cancel_token().clone();

        let exit = match target.engine.run(request, sink.clone(), cancel).await {
            Ok(exit) => exit,
            Err(e) => return Ok(StepEnd::Error(e.to_string())),
        };

        let stdout = sink.stdout_text().trim_end().to_string();
        if exit.stopped {
            self.set_output(Value::String(stdout));
            return Ok(StepEnd::Stopped);
        }
        if exit.success() {
            self.set_output(Value::String(stdout));
            return Ok(StepEnd::Success);
        }

        let stderr = sink.stderr_text().trim_end().to_string();
        let output = if stderr.is_empty() { stdout } else { stderr };
        self.set_output(Value::String(output.clone()));
        let reason = match exit.code {
            Some(code) => format!("Command failed with exit code {code}"),
            None => "Command terminated by signal".to_string(),
        };
        Ok(StepEnd::Failure(if output.is_empty() {
            reason
        } else {
            format!("{reason}: {output}")
        }))
    }

    // -----------------------------------------------------------------------
    // Action path
    // -----------------------------------------------------------------------

    async fn run_action(&self, name: &str, scope: &Value) -> Result<StepEnd, StepEnd> {
        let action = self
            .ctx
            .actions
            .get(name)
            .ok_or_else(|| StepEnd::Error(format!("No usable step with the name {name} found")))?;
        let with = match &self.definition.with {
            Some(with) => interpolate_value(self.ctx.evaluator.as_ref(), with, scope)
                .map_err(|e| StepEnd::Error(e.to_string()))?,
            None => Value::Object(Default::default()),
        };

        let mut actx = ActionContext::new(with)
            .with_engine_result(self.ctx.resolve_target(self.inherited.target.as_deref()));
        actx.environment = self.inherited.environment.clone();
        actx.scope = scope.clone();
        actx.working_directory = self.inherited.working_directory.clone();
        actx.sink = self.sink();
        actx.cancel = self.lifecycle.cancel_token().clone();
        if actx.target.is_none() {
            actx.target = self.inherited.target.clone();
        }

        if !self.start() {
            return Err(StepEnd::Stopped);
        }

        let cancel = actx.cancel.clone();
        let mut running = std::pin::pin!(action.run(&actx));
        let result = tokio::select! {
            result = &mut running => result,
            _ = cancel.cancelled() => {
                match tokio::time::timeout(ACTION_STOP_GRACE, &mut running).await {
                    Ok(result) => result,
                    Err(_) => {
                        tracing::warn!(action = name, "action ignored stop request, dropping it");
                        Err(ActionError::Stopped)
                    }
                }
            }
        };

        let printed = actx.sink.stdout_text().trim_end().to_string();
        Ok(match result {
            Ok(value) => {
                self.set_output(value.unwrap_or(Value::String(printed)));
                StepEnd::Success
            }
            Err(ActionError::Failed(message)) => {
                self.set_output(Value::String(printed));
                StepEnd::Failure(message)
            }
            Err(ActionError::Setup(message)) => StepEnd::Error(message),
            Err(ActionError::Stopped) => StepEnd::Stopped,
        })
    }
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("routine", &self.routine.name)
            .field("index", &self.index)
            .field("name", &self.definition.name)
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{BoxAction, UsableAction};
    use crate::testing::{run_context_with, ScriptEngine};
    use indexmap::IndexMap;
    use serde_json::json;

    fn step(def: StepDefinition, ctx: Arc<RunContext>) -> Step {
        Step::new(
            0,
            def,
            RoutineRef::plain("build"),
            &Inherited::default(),
            ctx,
            CancellationToken::new(),
        )
    }

    fn command(run: &str) -> StepDefinition {
        StepDefinition {
            name: Some("s".into()),
            run: Some(run.into()),
            ..Default::default()
        }
    }

    fn scope() -> Value {
        json!({ "variables": { "who": "world" }, "outputs": {}, "environment": {} })
    }

    struct Answer;

    impl UsableAction for Answer {
        fn name(&self) -> &str {
            "Answer"
        }

        async fn run(&self, ctx: &ActionContext) -> Result<Option<Value>, ActionError> {
            match ctx.param_str("mode") {
                Some("fail") => Err(ActionError::Failed("no answer".into())),
                Some("print") => {
                    ctx.print("forty-two\n");
                    Ok(None)
                }
                Some("wait") => {
                    ctx.cancel.cancelled().await;
                    Err(ActionError::Stopped)
                }
                _ => Ok(Some(json!({ "answer": 42, "greeting": ctx.param("greeting") }))),
            }
        }
    }

    fn ctx() -> Arc<RunContext> {
        run_context_with(ScriptEngine::new(), IndexMap::new(), |actions| {
            actions.register(BoxAction::new(Answer))
        })
    }

    #[tokio::test]
    async fn command_success_captures_trimmed_stdout() {
        let s = step(command("echo hello ${{ variables.who }}"), ctx());
        let outcome = s.run(&scope()).await;
        assert_eq!(outcome, Outcome::new(RunStatus::Success, None));
        assert_eq!(s.output(), Some(json!("hello world")));
        assert_eq!(s.command().as_deref(), Some("echo hello world"));
    }

    #[tokio::test]
    async fn command_failure_reports_exit_code_and_stderr() {
        let s = step(command("echo partial; warn broken; fail 3"), ctx());
        let outcome = s.run(&scope()).await;
        assert_eq!(outcome.status, RunStatus::Failure);
        assert_eq!(
            outcome.error.as_deref(),
            Some("Command failed with exit code 3: broken")
        );
        assert_eq!(s.output(), Some(json!("broken")));
    }

    #[tokio::test]
    async fn command_failure_without_stderr_uses_stdout() {
        let s = step(command("echo partial; fail 1"), ctx());
        let outcome = s.run(&scope()).await;
        assert_eq!(
            outcome.error.as_deref(),
            Some("Command failed with exit code 1: partial")
        );
    }

    #[tokio::test]
    async fn nothing_to_run_is_error() {
        let s = step(StepDefinition::default(), ctx());
        let outcome = s.run(&scope()).await;
        assert_eq!(outcome.status, RunStatus::Error);
        assert_eq!(outcome.error.as_deref(), Some(NOTHING_TO_RUN));
    }

    #[tokio::test]
    async fn unknown_target_is_error_before_running() {
        let mut def = command("echo hi");
        def.target = Some("mars".into());
        let s = step(def, ctx());
        let outcome = s.run(&scope()).await;
        assert_eq!(outcome.status, RunStatus::Error);
        assert_eq!(outcome.error.as_deref(), Some("Target \"mars\" is not defined"));
        assert!(s.graph().timing.started_at.is_none());
    }

    #[tokio::test]
    async fn input_and_environment_reach_the_engine() {
        let mut def = command("cat; env GREETING");
        def.input = Some("from ${{ variables.who }}".into());
        def.environment.insert("GREETING".into(), "hey".into());
        let s = step(def, ctx());
        s.run(&scope()).await;
        assert_eq!(s.output(), Some(json!("from world\nhey")));
    }

    #[tokio::test]
    async fn action_structured_output() {
        let def = StepDefinition {
            use_: Some("answer".into()),
            with: Some(json!({ "greeting": "hi ${{ variables.who }}" })),
            ..Default::default()
        };
        let s = step(def, ctx());
        let outcome = s.run(&scope()).await;
        assert_eq!(outcome.status, RunStatus::Success);
        assert_eq!(s.output(), Some(json!({ "answer": 42, "greeting": "hi world" })));
        assert!(s.command().is_none());
    }

    #[tokio::test]
    async fn action_printed_output_and_failure() {
        let printed = step(
            StepDefinition {
                use_: Some("ANSWER".into()),
                with: Some(json!({ "mode": "print" })),
                ..Default::default()
            },
            ctx(),
        );
        printed.run(&scope()).await;
        assert_eq!(printed.output(), Some(json!("forty-two")));

        let failing = step(
            StepDefinition {
                use_: Some("answer".into()),
                with: Some(json!({ "mode": "fail" })),
                ..Default::default()
            },
            ctx(),
        );
        let outcome = failing.run(&scope()).await;
        assert_eq!(outcome, Outcome::new(RunStatus::Failure, Some("no answer".into())));
    }

    #[tokio::test]
    async fn unknown_action_is_error() {
        let s = step(
            StepDefinition {
                use_: Some("nope".into()),
                ..Default::default()
            },
            ctx(),
        );
        let outcome = s.run(&scope()).await;
        assert_eq!(outcome.status, RunStatus::Error);
        assert_eq!(
            outcome.error.as_deref(),
            Some("No usable step with the name nope found")
        );
    }

    #[tokio::test]
    async fn stop_moves_running_command_through_stopping() {
        let s = Arc::new(step(command("wait"), ctx()));
        let mut events = s.ctx.events.subscribe();

        let runner = {
            let s = s.clone();
            tokio::spawn(async move { s.run(&scope()).await })
        };
        while s.status() != RunStatus::Running {
            tokio::task::yield_now().await;
        }
        s.stop().await;

        let outcome = runner.await.unwrap();
        assert_eq!(outcome.status, RunStatus::Stopped);

        let mut names = Vec::new();
        while let Ok(event) = events.try_recv() {
            names.push(event.name());
        }
        assert_eq!(names, vec!["step:running", "step:stopping", "step:stopped"]);
    }

    #[tokio::test]
    async fn stop_reaches_running_action() {
        let s = Arc::new(step(
            StepDefinition {
                use_: Some("answer".into()),
                with: Some(json!({ "mode": "wait" })),
                ..Default::default()
            },
            ctx(),
        ));
        let runner = {
            let s = s.clone();
            tokio::spawn(async move { s.run(&scope()).await })
        };
        while s.status() != RunStatus::Running {
            tokio::task::yield_now().await;
        }
        s.stop().await;
        assert_eq!(runner.await.unwrap().status, RunStatus::Stopped);
    }

    #[tokio::test]
    async fn stop_before_run_never_starts() {
        let s = step(command("echo never"), ctx());
        s.stop().await;
        let outcome = s.run(&scope()).await;
        assert_eq!(outcome, Outcome::not_started());
        assert_eq!(s.status(), RunStatus::Idle);
    }

    #[tokio::test]
    async fn skip_marks_skipped() {
        let s = step(command("echo skipped"), ctx());
        s.skip();
        assert_eq!(s.status(), RunStatus::Skipped);
        assert!(s.output().is_none());
    }
}
