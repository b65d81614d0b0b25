//! Routine: runs its steps strictly in order.
//!
//! Each step's `if`/`unless` is evaluated against the scope (plus the
//! `strategy` key for strategy members) right before it would run. Named
//! step outputs are recorded in the shared scope under the routine's display
//! name once the step is terminal.

use std::sync::{Arc, Mutex, PoisonError};

use cadence_types::definition::{OnFailure, RoutineDefinition};
use cadence_types::event::{RoutineRef, WorkflowEvent};
use cadence_types::graph::RoutineGraph;
use cadence_types::status::RunStatus;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::context::{Inherited, RunContext};
use super::expression::should_skip;
use super::lifecycle::{Lifecycle, Outcome, StopRequest};
use super::step::Step;

const ROUTINE_STOPPED: &str = "Routine was stopped";

pub struct Routine {
    reference: RoutineRef,
    strategy_scope: Option<Value>,
    steps: Vec<Step>,
    ctx: Arc<RunContext>,
    lifecycle: Lifecycle,
    current: Mutex<Option<usize>>,
}

impl Routine {
    /// Build a routine instance and its steps.
    ///
    /// `inherited` holds the workflow-level settings. `strategy_scope` is the
    /// value exposed as `strategy` to this instance's expressions.
    pub fn new(
        reference: RoutineRef,
        definition: &RoutineDefinition,
        inherited: &Inherited,
        strategy_scope: Option<Value>,
        ctx: Arc<RunContext>,
    ) -> Self {
        let inherited = inherited.child(
            &definition.environment,
            definition.target.as_deref(),
            definition.working_directory.as_deref(),
        );
        let steps = definition
            .steps
            .iter()
            .enumerate()
            .map(|(index, step)| {
                Step::new(
                    index,
                    step.clone(),
                    reference.clone(),
                    &inherited,
                    ctx.clone(),
                    CancellationToken::new(),
                )
            })
            .collect();

        Self {
            reference,
            strategy_scope,
            steps,
            ctx,
            lifecycle: Lifecycle::new(CancellationToken::new()),
            current: Mutex::new(None),
        }
    }

    /// Display name: the declared name, or `name [i]` for strategy members.
    pub fn name(&self) -> &str {
        &self.reference.name
    }

    pub fn reference(&self) -> &RoutineRef {
        &self.reference
    }

    pub fn status(&self) -> RunStatus {
        self.lifecycle.status()
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Scope object this routine's expressions see.
    pub fn scope_value(&self) -> Value {
        self.ctx.scope.to_value(self.strategy_scope.as_ref())
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    pub async fn run(&self) -> Outcome {
        if self.lifecycle.is_stop_requested() {
            return Outcome::not_started();
        }

        let mut started = false;
        let mut end: Option<(RunStatus, Option<String>)> = None;

        for step in &self.steps {
            if self.lifecycle.is_stop_requested() {
                end = Some((RunStatus::Stopped, None));
                break;
            }

            let scope = self.scope_value();
            let def = step.definition();
            let skip = should_skip(
                self.ctx.evaluator.as_ref(),
                def.if_.as_ref(),
                def.unless.as_ref(),
                &scope,
            );

            if matches!(skip, Ok(true)) {
                step.skip();
                continue;
            }
            if !started {
                if !self.start() {
                    return Outcome::not_started();
                }
                started = true;
            }

            let outcome = match skip {
                Err(e) => step.fail_setup(e.to_string()),
                _ => {
                    self.set_current(Some(step.index()));
                    if self.lifecycle.is_stop_requested() {
                        end = Some((RunStatus::Stopped, None));
                        break;
                    }
                    let outcome = step.run(&scope).await;
                    self.set_current(None);
                    outcome
                }
            };

            // Steps that ended before producing anything still get a key.
            if let Some(name) = step.name() {
                let output = step.output().unwrap_or(Value::Null);
                self.ctx.scope.record_output(self.name(), name, output);
            }

            match outcome.status {
                RunStatus::Success | RunStatus::Skipped => {}
                RunStatus::Failure | RunStatus::Error
                    if OnFailure::continues(def.on_failure) =>
                {
                    tracing::warn!(
                        routine = %self.name(),
                        step = step.index(),
                        error = outcome.error.as_deref().unwrap_or_default(),
                        "step failed, continuing"
                    );
                }
                RunStatus::Failure | RunStatus::Error => {
                    end = Some((outcome.status, outcome.error));
                    break;
                }
                _ => {
                    end = Some((RunStatus::Stopped, None));
                    break;
                }
            }
        }

        if !started && !self.start() {
            return Outcome::not_started();
        }

        let (status, error) = match end {
            _ if self.lifecycle.is_stop_requested() => {
                (RunStatus::Stopped, Some(ROUTINE_STOPPED.to_string()))
            }
            Some(end) => end,
            None => (RunStatus::Success, None),
        };
        self.finish(status, error)
    }

    /// Mark the routine skipped by its descriptor's `if`/`unless`.
    pub fn skip(&self) {
        if self.lifecycle.transition(RunStatus::Skipped, None) {
            self.publish(RunStatus::Skipped, None);
        }
    }

    /// End the routine in `Error` before it started.
    pub fn fail_setup(&self, message: impl Into<String>) -> Outcome {
        self.finish(RunStatus::Error, Some(message.into()))
    }

    /// Stop the routine and whichever step is active.
    ///
    /// Idempotent. A routine that never started never will.
    pub async fn stop(&self) {
        match self.lifecycle.request_stop() {
            StopRequest::Requested => {
                self.publish(RunStatus::Stopping, None);
                let current = *self.current.lock().unwrap_or_else(PoisonError::into_inner);
                if let Some(step) = current.and_then(|index| self.steps.get(index)) {
                    tracing::debug!(routine = %self.name(), step = step.index(), "stopping active step");
                    step.stop().await;
                }
                self.lifecycle.wait_terminal().await;
            }
            StopRequest::AlreadyStopping => {
                self.lifecycle.wait_terminal().await;
            }
            StopRequest::NotStarted | StopRequest::Finished => {}
        }
    }

    pub fn graph(&self) -> RoutineGraph {
        let snap = self.lifecycle.snapshot();
        RoutineGraph {
            name: self.name().to_string(),
            status: snap.status,
            timing: snap.timing(),
            error: snap.error.clone(),
            steps: self.steps.iter().map(Step::graph).collect(),
        }
    }

    fn set_current(&self, index: Option<usize>) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = index;
    }

    fn start(&self) -> bool {
        let started = self.lifecycle.transition(RunStatus::Running, None);
        if started {
            tracing::debug!(routine = %self.name(), "routine started");
            self.publish(RunStatus::Running, None);
        }
        started
    }

    fn finish(&self, status: RunStatus, error: Option<String>) -> Outcome {
        match self.lifecycle.finish(status, error.clone()) {
            Some(reached) => {
                tracing::debug!(routine = %self.name(), status = %reached, "routine finished");
                self.publish(reached, error.clone());
                Outcome::new(reached, error)
            }
            None => {
                let snap = self.lifecycle.snapshot();
                Outcome::new(snap.status, snap.error)
            }
        }
    }

    fn publish(&self, status: RunStatus, error: Option<String>) {
        self.ctx.events.publish(WorkflowEvent::Routine {
            run_id: self.ctx.run_id,
            routine: self.reference.clone(),
            status,
            error,
        });
    }
}

impl std::fmt::Debug for Routine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Routine")
            .field("name", &self.reference.name)
            .field("status", &self.status())
            .field("steps", &self.steps.len())
            .finish()
    }
}
