//! Workflow scheduler: dependency-gated, bounded-concurrency routine runner.
//!
//! # Execution flow
//!
//! 1. `Workflow::new` validates the descriptor, builds the dependency graph
//!    (rejecting missing and circular dependencies), and creates one run
//!    descriptor per declared routine. Literal strategies expand here.
//! 2. `run` enqueues every dependency-free descriptor, then drains the FIFO
//!    queue into a `JoinSet` while fewer than `max_concurrent_routines`
//!    routines are in flight. Each completion refills the pool.
//! 3. A finished descriptor either marks itself ready in its dependents
//!    (Success/Skipped) or cancels every transitive dependent.
//! 4. Strategy groups push one job per member to the back of the queue and
//!    reduce their members' outcomes to a single status.
//!
//! All descriptor state lives in one `Schedule` behind a mutex. Only the task
//! driving `run` and a concurrent `stop` ever take it, and it is never held
//! across an await.

use std::collections::{HashSet, VecDeque};
use std::num::NonZeroUsize;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use cadence_types::definition::{OnFailure, RoutineDefinition, WorkflowDefinition};
use cadence_types::event::{RoutineRef, WorkflowEvent};
use cadence_types::graph::{
    GraphEntry, StrategyGraph, StrategyRoutineGraph, WorkflowGraph,
};
use cadence_types::status::{DescriptorStatus, RunStatus};
use futures_util::future::join_all;
use futures_util::FutureExt;
use serde_json::{Map, Value};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::action::{ActionRegistry, BoxAction};
use crate::engine::{BoxEngine, EngineRegistry};
use crate::event::bus::EventBus;

use super::context::{Inherited, RunContext, Scope};
use super::dag::DependencyGraph;
use super::definition::{validate_definition, WorkflowError};
use super::expression::{should_skip, ExpressionEvaluator, JexlEvaluator};
use super::lifecycle::{Lifecycle, Outcome, StopRequest};
use super::routine::Routine;
use super::strategy::{expand_static, expand_strategy, member_name, StrategyCombination};

const WORKFLOW_FAILED: &str = "Workflow failed";
const WORKFLOW_STOPPED: &str = "Workflow was stopped";

/// Default cap on simultaneously running routines: one less than the
/// available parallelism, at least 1.
pub fn default_max_concurrent_routines() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
        .saturating_sub(1)
        .max(1)
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Collaborators and limits for one workflow.
#[derive(Clone)]
pub struct WorkflowOptions {
    /// Overrides the descriptor's `maxConcurrentRoutines`.
    pub max_concurrent_routines: Option<usize>,
    pub engines: EngineRegistry,
    pub actions: ActionRegistry,
    pub evaluator: Arc<dyn ExpressionEvaluator>,
    pub events: EventBus,
    /// Target used when neither the descriptor nor a routine or step names one.
    pub default_target: Option<String>,
}

impl Default for WorkflowOptions {
    fn default() -> Self {
        Self {
            max_concurrent_routines: None,
            engines: EngineRegistry::new(),
            actions: ActionRegistry::new(),
            evaluator: Arc::new(JexlEvaluator::new()),
            events: EventBus::default(),
            default_target: None,
        }
    }
}

impl WorkflowOptions {
    pub fn with_engine(mut self, engine: BoxEngine) -> Self {
        self.engines.register(engine);
        self
    }

    pub fn with_action(mut self, action: BoxAction) -> Self {
        self.actions.register(action);
        self
    }

    pub fn with_max_concurrent_routines(mut self, max: usize) -> Self {
        self.max_concurrent_routines = Some(max);
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn ExpressionEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn with_default_target(mut self, target: Option<String>) -> Self {
        self.default_target = target;
        self
    }
}

impl std::fmt::Debug for WorkflowOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowOptions")
            .field("max_concurrent_routines", &self.max_concurrent_routines)
            .field("engines", &self.engines.list_names())
            .field("actions", &self.actions.list_names())
            .field("default_target", &self.default_target)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Run descriptors
// ---------------------------------------------------------------------------

struct StrategyMember {
    index: usize,
    variables: Map<String, Value>,
    routine: Arc<Routine>,
}

enum DescriptorKind {
    Single(Arc<Routine>),
    /// Members are set once: at construction for literal strategies, at
    /// dispatch for expression strategies.
    Strategy(OnceLock<Vec<StrategyMember>>),
}

struct RunDescriptor {
    name: String,
    definition: RoutineDefinition,
    kind: DescriptorKind,
}

impl RunDescriptor {
    fn members(&self) -> &[StrategyMember] {
        match &self.kind {
            DescriptorKind::Strategy(members) => members.get().map(Vec::as_slice).unwrap_or(&[]),
            DescriptorKind::Single(_) => &[],
        }
    }

    /// Every routine instance currently known for this descriptor.
    fn routines(&self) -> Vec<Arc<Routine>> {
        match &self.kind {
            DescriptorKind::Single(routine) => vec![routine.clone()],
            DescriptorKind::Strategy(_) => {
                self.members().iter().map(|m| m.routine.clone()).collect()
            }
        }
    }

    fn tolerates_failure(&self) -> bool {
        let policy = match &self.kind {
            DescriptorKind::Strategy(_) => self
                .definition
                .strategy
                .as_ref()
                .and_then(|s| s.on_failure)
                .or(self.definition.on_failure),
            DescriptorKind::Single(_) => self.definition.on_failure,
        };
        OnFailure::continues(policy)
    }
}

#[derive(Debug, Default)]
struct GroupProgress {
    remaining: usize,
    failed: bool,
    stopped: bool,
    aborted: bool,
    error: Option<String>,
}

#[derive(Debug, Default)]
struct DescriptorState {
    status: DescriptorStatus,
    error: Option<String>,
    /// Dependencies that finished with Success or Skipped.
    ready: HashSet<usize>,
    group: GroupProgress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Job {
    Descriptor(usize),
    Member { descriptor: usize, member: usize },
}

#[derive(Debug, Default)]
struct Schedule {
    queue: VecDeque<Job>,
    in_flight: usize,
    stop_requested: bool,
    descriptors: Vec<DescriptorState>,
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

pub struct Workflow {
    ctx: Arc<RunContext>,
    inherited: Inherited,
    graph: DependencyGraph,
    descriptors: Vec<RunDescriptor>,
    max_concurrent: usize,
    lifecycle: Lifecycle,
    schedule: Mutex<Schedule>,
}

impl Workflow {
    /// Prepare a workflow. Fails before anything runs on an invalid
    /// descriptor, a missing or circular dependency, or a literal strategy
    /// without sources.
    pub fn new(definition: WorkflowDefinition, options: WorkflowOptions) -> Result<Self, WorkflowError> {
        validate_definition(&definition)?;
        let graph = DependencyGraph::build(&definition.routines)?;

        let ctx = Arc::new(RunContext {
            run_id: Uuid::now_v7(),
            scope: Scope::new(definition.variables.clone(), definition.environment.clone()),
            evaluator: options.evaluator,
            engines: options.engines,
            actions: options.actions,
            events: options.events,
            targets: definition.targets.clone(),
        });
        let inherited = Inherited {
            environment: definition.environment.clone(),
            target: definition.target.clone().or(options.default_target),
            working_directory: definition.working_directory.as_deref().map(PathBuf::from),
        };

        let mut descriptors = Vec::with_capacity(definition.routines.len());
        for (name, routine) in &definition.routines {
            let kind = match &routine.strategy {
                None => DescriptorKind::Single(Arc::new(Routine::new(
                    RoutineRef::plain(name.as_str()),
                    routine,
                    &inherited,
                    None,
                    ctx.clone(),
                ))),
                Some(strategy) => {
                    let members = OnceLock::new();
                    let combinations =
                        expand_static(strategy).map_err(|source| WorkflowError::Strategy {
                            routine: name.clone(),
                            source,
                        })?;
                    if let Some(combinations) = combinations {
                        let built = build_members(name, routine, &combinations, &inherited, &ctx);
                        let _ = members.set(built);
                    }
                    DescriptorKind::Strategy(members)
                }
            };
            descriptors.push(RunDescriptor {
                name: name.clone(),
                definition: routine.clone(),
                kind,
            });
        }

        let max_concurrent = options
            .max_concurrent_routines
            .or(definition.max_concurrent_routines)
            .unwrap_or_else(default_max_concurrent_routines)
            .max(1);

        let schedule = Schedule {
            descriptors: descriptors.iter().map(|_| DescriptorState::default()).collect(),
            ..Schedule::default()
        };

        Ok(Self {
            ctx,
            inherited,
            graph,
            descriptors,
            max_concurrent,
            lifecycle: Lifecycle::new(CancellationToken::new()),
            schedule: Mutex::new(schedule),
        })
    }

    pub fn run_id(&self) -> Uuid {
        self.ctx.run_id
    }

    pub fn status(&self) -> RunStatus {
        self.lifecycle.status()
    }

    pub fn events(&self) -> &EventBus {
        &self.ctx.events
    }

    pub fn scope(&self) -> &Scope {
        &self.ctx.scope
    }

    pub fn max_concurrent_routines(&self) -> usize {
        self.max_concurrent
    }

    /// 1-based stage of a declared routine.
    pub fn stage_of(&self, routine: &str) -> Option<usize> {
        self.descriptors
            .iter()
            .position(|d| d.name == routine)
            .map(|index| self.graph.stages[index])
    }

    /// Scheduling status of a declared routine or strategy group.
    pub fn descriptor_status(&self, routine: &str) -> Option<DescriptorStatus> {
        let index = self.descriptors.iter().position(|d| d.name == routine)?;
        Some(self.lock().descriptors[index].status)
    }

    fn lock(&self) -> MutexGuard<'_, Schedule> {
        self.schedule.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -----------------------------------------------------------------------
    // Run
    // -----------------------------------------------------------------------

    /// Run every routine to a terminal state.
    ///
    /// Returns `Outcome::not_started()` when stopped before starting, and
    /// when called a second time.
    pub async fn run(&self) -> Outcome {
        if !self.lifecycle.transition(RunStatus::Running, None) {
            return Outcome::not_started();
        }
        tracing::info!(
            run_id = %self.ctx.run_id,
            routines = self.descriptors.len(),
            max_concurrent = self.max_concurrent,
            "workflow started"
        );
        self.publish(RunStatus::Running, None);

        {
            let mut schedule = self.lock();
            for (index, deps) in self.graph.dependencies.iter().enumerate() {
                if deps.is_empty() {
                    schedule.queue.push_back(Job::Descriptor(index));
                }
            }
        }

        let mut tasks: JoinSet<(Job, Outcome)> = JoinSet::new();
        loop {
            self.dispatch(&mut tasks);
            match tasks.join_next().await {
                Some(Ok((job, outcome))) => self.complete(job, outcome),
                Some(Err(e)) => {
                    tracing::error!(run_id = %self.ctx.run_id, error = %e, "routine task failed to join");
                }
                None => break,
            }
        }

        let status = self.final_status();
        let error = match status {
            RunStatus::Success => None,
            RunStatus::Stopped => Some(WORKFLOW_STOPPED.to_string()),
            _ => Some(WORKFLOW_FAILED.to_string()),
        };
        let reached = self.lifecycle.finish(status, error.clone()).unwrap_or(status);
        tracing::info!(run_id = %self.ctx.run_id, status = %reached, "workflow finished");
        self.publish(reached, error);
        self.ctx.events.publish(WorkflowEvent::End {
            run_id: self.ctx.run_id,
            status: reached,
            graph: Box::new(self.graph()),
        });

        let snap = self.lifecycle.snapshot();
        Outcome::new(snap.status, snap.error)
    }

    /// Start queued jobs while under the concurrency cap.
    fn dispatch(&self, tasks: &mut JoinSet<(Job, Outcome)>) {
        loop {
            let job = {
                let mut schedule = self.lock();
                if schedule.in_flight >= self.max_concurrent && !schedule.stop_requested {
                    return;
                }
                match schedule.queue.pop_front() {
                    Some(job) => job,
                    None => return,
                }
            };

            match job {
                Job::Descriptor(index) => self.start_descriptor(index, tasks),
                Job::Member { descriptor, member } => {
                    let routine = self.descriptors[descriptor]
                        .members()
                        .get(member)
                        .map(|m| m.routine.clone());
                    let mut schedule = self.lock();
                    match routine {
                        Some(routine) if !schedule.stop_requested => {
                            schedule.in_flight += 1;
                            spawn_routine(tasks, job, routine);
                        }
                        _ => self.member_finished(
                            &mut schedule,
                            descriptor,
                            member,
                            &Outcome::not_started(),
                        ),
                    }
                }
            }
        }
    }

    fn start_descriptor(&self, index: usize, tasks: &mut JoinSet<(Job, Outcome)>) {
        let descriptor = &self.descriptors[index];
        {
            let mut schedule = self.lock();
            let state = &mut schedule.descriptors[index];
            if state.status != DescriptorStatus::Pending {
                return;
            }
            if schedule.stop_requested {
                schedule.descriptors[index].status = DescriptorStatus::Canceled;
                return;
            }
        }

        let scope = self.ctx.scope.to_value(None);
        let skip = should_skip(
            self.ctx.evaluator.as_ref(),
            descriptor.definition.if_.as_ref(),
            descriptor.definition.unless.as_ref(),
            &scope,
        );
        match skip {
            Ok(true) => {
                tracing::debug!(routine = %descriptor.name, "routine skipped by condition");
                for routine in descriptor.routines() {
                    routine.skip();
                }
                let mut schedule = self.lock();
                self.settle(&mut schedule, index, DescriptorStatus::Skipped, None);
                return;
            }
            Ok(false) => {}
            Err(e) => {
                let message = e.to_string();
                if let DescriptorKind::Single(routine) = &descriptor.kind {
                    routine.fail_setup(message.clone());
                }
                self.fail_descriptor(index, message);
                return;
            }
        }

        match &descriptor.kind {
            DescriptorKind::Single(routine) => {
                let mut schedule = self.lock();
                if schedule.stop_requested {
                    schedule.descriptors[index].status = DescriptorStatus::Canceled;
                    return;
                }
                tracing::debug!(
                    routine = %descriptor.name,
                    stage = self.graph.stages[index],
                    "dispatching routine"
                );
                schedule.descriptors[index].status = DescriptorStatus::Running;
                schedule.in_flight += 1;
                spawn_routine(tasks, Job::Descriptor(index), routine.clone());
            }
            DescriptorKind::Strategy(members) => {
                if members.get().is_none() {
                    match self.expand_dynamic(descriptor, &scope) {
                        Ok(built) => {
                            let _ = members.set(built);
                        }
                        Err(message) => {
                            self.fail_descriptor(index, message);
                            return;
                        }
                    }
                }

                let count = descriptor.members().len();
                let mut schedule = self.lock();
                if schedule.stop_requested {
                    schedule.descriptors[index].status = DescriptorStatus::Canceled;
                    return;
                }
                if count == 0 {
                    self.settle(&mut schedule, index, DescriptorStatus::Success, None);
                    return;
                }
                tracing::debug!(
                    routine = %descriptor.name,
                    members = count,
                    "dispatching strategy group"
                );
                let state = &mut schedule.descriptors[index];
                state.status = DescriptorStatus::Running;
                state.group.remaining = count;
                for member in 0..count {
                    schedule.queue.push_back(Job::Member {
                        descriptor: index,
                        member,
                    });
                }
            }
        }
    }

    /// Settle a descriptor whose setup failed before any routine ran.
    ///
    /// Under `onFailure: continue` the descriptor still unblocks its
    /// dependents; the message stays on the graph.
    fn fail_descriptor(&self, index: usize, message: String) {
        let descriptor = &self.descriptors[index];
        let status = if descriptor.tolerates_failure() {
            tracing::warn!(
                routine = %descriptor.name,
                error = %message,
                "routine setup failed, continuing"
            );
            DescriptorStatus::Success
        } else {
            DescriptorStatus::Failure
        };
        let mut schedule = self.lock();
        self.settle(&mut schedule, index, status, Some(message));
    }

    fn expand_dynamic(
        &self,
        descriptor: &RunDescriptor,
        scope: &Value,
    ) -> Result<Vec<StrategyMember>, String> {
        let strategy = descriptor
            .definition
            .strategy
            .as_ref()
            .ok_or_else(|| "Strategy requires at least a matrix or include option".to_string())?;
        let combinations = expand_strategy(strategy, self.ctx.evaluator.as_ref(), scope)
            .map_err(|e| e.to_string())?;
        Ok(build_members(
            &descriptor.name,
            &descriptor.definition,
            &combinations,
            &self.inherited,
            &self.ctx,
        ))
    }

    /// Apply a finished task's outcome.
    fn complete(&self, job: Job, outcome: Outcome) {
        let mut schedule = self.lock();
        schedule.in_flight = schedule.in_flight.saturating_sub(1);

        match job {
            Job::Descriptor(index) => {
                let descriptor = &self.descriptors[index];
                let (status, error) = match outcome.status {
                    RunStatus::Success | RunStatus::Skipped => (DescriptorStatus::Success, None),
                    RunStatus::Failure | RunStatus::Error if descriptor.tolerates_failure() => {
                        tracing::warn!(
                            routine = %descriptor.name,
                            error = outcome.error.as_deref().unwrap_or_default(),
                            "routine failed, continuing"
                        );
                        (DescriptorStatus::Success, None)
                    }
                    RunStatus::Failure | RunStatus::Error => {
                        (DescriptorStatus::Failure, outcome.error)
                    }
                    RunStatus::Stopped | RunStatus::Stopping => {
                        (DescriptorStatus::Stopped, outcome.error)
                    }
                    RunStatus::Idle | RunStatus::Running => (DescriptorStatus::Canceled, None),
                };
                self.settle(&mut schedule, index, status, error);
            }
            Job::Member { descriptor, member } => {
                self.member_finished(&mut schedule, descriptor, member, &outcome);
            }
        }
    }

    /// Fold one member outcome into its group; settle the group when every
    /// member is accounted for.
    fn member_finished(&self, schedule: &mut Schedule, index: usize, member: usize, outcome: &Outcome) {
        let descriptor = &self.descriptors[index];
        let tolerates = descriptor.tolerates_failure();
        let mut abort = false;
        {
            let group = &mut schedule.descriptors[index].group;
            match outcome.status {
                RunStatus::Success | RunStatus::Skipped => {}
                RunStatus::Failure | RunStatus::Error => {
                    group.failed = true;
                    if group.error.is_none() {
                        group.error = outcome.error.clone();
                    }
                    if tolerates {
                        tracing::warn!(
                            routine = %member_name(&descriptor.name, member),
                            error = outcome.error.as_deref().unwrap_or_default(),
                            "strategy member failed, continuing"
                        );
                    } else if !group.aborted {
                        group.aborted = true;
                        abort = true;
                    }
                }
                _ => group.stopped = true,
            }
            group.remaining = group.remaining.saturating_sub(1);
        }

        if abort {
            tracing::debug!(routine = %descriptor.name, "strategy member failed, stopping siblings");
            let before = schedule.queue.len();
            schedule.queue.retain(|job| {
                !matches!(job, Job::Member { descriptor: d, .. } if *d == index)
            });
            let removed = before - schedule.queue.len();
            let group = &mut schedule.descriptors[index].group;
            group.remaining = group.remaining.saturating_sub(removed);
            if removed > 0 {
                group.stopped = true;
            }
            for (position, sibling) in descriptor.members().iter().enumerate() {
                if position != member {
                    let routine = sibling.routine.clone();
                    tokio::spawn(async move { routine.stop().await });
                }
            }
        }

        let group = &schedule.descriptors[index].group;
        if group.remaining > 0 || schedule.descriptors[index].status.is_terminal() {
            return;
        }
        let (status, error) = if group.failed && !tolerates {
            (DescriptorStatus::Failure, group.error.clone())
        } else if group.stopped && !group.failed {
            (DescriptorStatus::Stopped, None)
        } else {
            (DescriptorStatus::Success, None)
        };
        self.settle(schedule, index, status, error);
    }

    /// Record a descriptor's terminal status and notify or cancel dependents.
    fn settle(
        &self,
        schedule: &mut Schedule,
        index: usize,
        status: DescriptorStatus,
        error: Option<String>,
    ) {
        tracing::debug!(
            routine = %self.descriptors[index].name,
            status = %status,
            "run descriptor finished"
        );
        let state = &mut schedule.descriptors[index];
        state.status = status;
        state.error = error;

        if status.unblocks_dependents() {
            self.run_dependents(schedule, index);
        } else {
            self.cancel_dependents(schedule, index);
        }
    }

    fn run_dependents(&self, schedule: &mut Schedule, index: usize) {
        for &dependent in &self.graph.dependents[index] {
            let state = &mut schedule.descriptors[dependent];
            if state.status != DescriptorStatus::Pending {
                continue;
            }
            state.ready.insert(index);
            if state.ready.len() == self.graph.dependencies[dependent].len() {
                schedule.queue.push_back(Job::Descriptor(dependent));
            }
        }
    }

    fn cancel_dependents(&self, schedule: &mut Schedule, index: usize) {
        for dependent in self.graph.transitive_dependents(index) {
            let state = &mut schedule.descriptors[dependent];
            if state.status == DescriptorStatus::Pending {
                tracing::debug!(
                    routine = %self.descriptors[dependent].name,
                    cause = %self.descriptors[index].name,
                    "canceling dependent routine"
                );
                state.status = DescriptorStatus::Canceled;
            }
        }
    }

    /// Success if every descriptor succeeded or was skipped, Stopped if a
    /// stop was requested or anything stopped, Failure otherwise.
    fn final_status(&self) -> RunStatus {
        let mut schedule = self.lock();
        for state in schedule.descriptors.iter_mut() {
            if !state.status.is_terminal() {
                state.status = DescriptorStatus::Canceled;
            }
        }

        let all_ok = schedule
            .descriptors
            .iter()
            .all(|s| s.status.unblocks_dependents());
        let any_stopped = schedule
            .descriptors
            .iter()
            .any(|s| s.status == DescriptorStatus::Stopped);

        if schedule.stop_requested || any_stopped || self.lifecycle.is_stop_requested() {
            RunStatus::Stopped
        } else if all_ok {
            RunStatus::Success
        } else {
            RunStatus::Failure
        }
    }

    fn publish(&self, status: RunStatus, error: Option<String>) {
        self.ctx.events.publish(WorkflowEvent::Workflow {
            run_id: self.ctx.run_id,
            status,
            error,
        });
    }

    // -----------------------------------------------------------------------
    // Stop
    // -----------------------------------------------------------------------

    /// Stop the workflow.
    ///
    /// Queued descriptors and members are canceled; every routine is asked
    /// to stop, and in-flight ones move through Stopping to Stopped.
    /// Resolves once the workflow is terminal. Idempotent.
    pub async fn stop(&self) {
        match self.lifecycle.request_stop() {
            StopRequest::Requested => {
                tracing::info!(run_id = %self.ctx.run_id, "stopping workflow");
                self.publish(RunStatus::Stopping, None);
                let routines = {
                    let mut schedule = self.lock();
                    schedule.stop_requested = true;
                    let queued: Vec<Job> = schedule.queue.drain(..).collect();
                    for job in queued {
                        match job {
                            Job::Descriptor(index) => {
                                if schedule.descriptors[index].status == DescriptorStatus::Pending {
                                    schedule.descriptors[index].status = DescriptorStatus::Canceled;
                                }
                            }
                            Job::Member { descriptor, member } => self.member_finished(
                                &mut schedule,
                                descriptor,
                                member,
                                &Outcome::not_started(),
                            ),
                        }
                    }
                    self.descriptors
                        .iter()
                        .flat_map(RunDescriptor::routines)
                        .collect::<Vec<_>>()
                };
                join_all(routines.iter().map(|routine| routine.stop())).await;
                self.lifecycle.wait_terminal().await;
            }
            StopRequest::AlreadyStopping => {
                self.lifecycle.wait_terminal().await;
            }
            StopRequest::NotStarted => {
                self.lock().stop_requested = true;
            }
            StopRequest::Finished => {}
        }
    }

    // -----------------------------------------------------------------------
    // Graph snapshot
    // -----------------------------------------------------------------------

    /// Point-in-time snapshot, grouped by stage.
    pub fn graph(&self) -> WorkflowGraph {
        let snap = self.lifecycle.snapshot();
        let schedule = self.lock();

        let mut stages: Vec<Vec<GraphEntry>> = vec![Vec::new(); self.graph.stage_count()];
        for (index, descriptor) in self.descriptors.iter().enumerate() {
            let entry = match &descriptor.kind {
                DescriptorKind::Single(routine) => GraphEntry::Routine(routine.graph()),
                DescriptorKind::Strategy(_) => {
                    let state = &schedule.descriptors[index];
                    GraphEntry::Strategy(StrategyGraph {
                        name: descriptor.name.clone(),
                        status: state.status,
                        error: state.error.clone(),
                        strategy: descriptor
                            .members()
                            .iter()
                            .map(|member| StrategyRoutineGraph {
                                index: member.index,
                                variables: member.variables.clone(),
                                routine: member.routine.graph(),
                            })
                            .collect(),
                    })
                }
            };
            stages[self.graph.stages[index] - 1].push(entry);
        }

        WorkflowGraph {
            run_id: self.ctx.run_id,
            status: snap.status,
            timing: snap.timing(),
            error: snap.error,
            routines: stages,
        }
    }
}

impl std::fmt::Debug for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workflow")
            .field("run_id", &self.ctx.run_id)
            .field("status", &self.status())
            .field("routines", &self.descriptors.iter().map(|d| &d.name).collect::<Vec<_>>())
            .field("max_concurrent", &self.max_concurrent)
            .finish()
    }
}

fn build_members(
    name: &str,
    definition: &RoutineDefinition,
    combinations: &[StrategyCombination],
    inherited: &Inherited,
    ctx: &Arc<RunContext>,
) -> Vec<StrategyMember> {
    combinations
        .iter()
        .map(|combination| StrategyMember {
            index: combination.index,
            variables: combination.variables.clone(),
            routine: Arc::new(Routine::new(
                RoutineRef::member(combination.routine_name(name), name, combination.index),
                definition,
                inherited,
                Some(combination.scope_value()),
                ctx.clone(),
            )),
        })
        .collect()
}

fn spawn_routine(tasks: &mut JoinSet<(Job, Outcome)>, job: Job, routine: Arc<Routine>) {
    tasks.spawn(async move {
        let outcome = AssertUnwindSafe(routine.run())
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                tracing::error!(routine = %routine.name(), "routine panicked");
                Outcome::new(RunStatus::Error, Some("Routine panicked".to_string()))
            });
        (job, outcome)
    });
}
