//! Test doubles: a scripted execution engine and run-context builders.
//!
//! `ScriptEngine` interprets `;`-separated statements instead of spawning
//! processes:
//!
//! | Statement   | Effect                                        |
//! |-------------|-----------------------------------------------|
//! | `echo TEXT` | writes `TEXT\n` to stdout                     |
//! | `warn TEXT` | writes `TEXT\n` to stderr                     |
//! | `fail CODE` | exits with `CODE`                             |
//! | `sleep MS`  | sleeps, ending early as stopped on cancel     |
//! | `wait`      | blocks until cancelled                        |
//! | `cat`       | echoes the request input                      |
//! | `env KEY`   | echoes an environment variable                |
//! | `pwd`       | echoes the working directory                  |
//!
//! Unknown statements exit with 127.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use indexmap::IndexMap;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use cadence_types::definition::TargetDefinition;

use crate::action::ActionRegistry;
use crate::engine::{
    BoxEngine, CommandExit, CommandRequest, EngineError, EngineRegistry, ExecutionEngine,
    OutputSink,
};
use crate::event::bus::EventBus;
use crate::workflow::context::{ResolvedTarget, RunContext, Scope};
use crate::workflow::expression::JexlEvaluator;

#[derive(Debug, Default)]
pub struct ScriptStats {
    active: AtomicUsize,
    peak: AtomicUsize,
    log: Mutex<Vec<String>>,
}

impl ScriptStats {
    /// Commands currently running.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Highest number of commands that ever ran at once.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// `start:<command>` / `end:<command>` entries in order.
    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Commands in start order.
    pub fn started(&self) -> Vec<String> {
        self.log()
            .into_iter()
            .filter_map(|entry| entry.strip_prefix("start:").map(str::to_string))
            .collect()
    }

    fn record(&self, entry: String) {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }
}

#[derive(Debug, Clone)]
pub struct ScriptEngine {
    name: String,
    stats: Arc<ScriptStats>,
}

impl ScriptEngine {
    /// An engine registered as `local`.
    pub fn new() -> Self {
        Self::named("local")
    }

    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            stats: Arc::default(),
        }
    }

    pub fn stats(&self) -> &ScriptStats {
        &self.stats
    }

    /// This engine as the resolved `local` target.
    pub fn target(&self) -> ResolvedTarget {
        ResolvedTarget {
            name: self.name.clone(),
            engine: Arc::new(BoxEngine::new(self.clone())),
            options: None,
        }
    }

    async fn execute(
        &self,
        request: &CommandRequest,
        sink: &OutputSink,
        cancel: &CancellationToken,
    ) -> CommandExit {
        if cancel.is_cancelled() {
            return CommandExit::stopped();
        }
        for statement in request.command.split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            let (verb, rest) = statement.split_once(' ').unwrap_or((statement, ""));
            match verb {
                "echo" => sink.stdout(&format!("{rest}\n")),
                "warn" => sink.stderr(&format!("{rest}\n")),
                "fail" => return CommandExit::exited(rest.trim().parse().unwrap_or(1)),
                "sleep" => {
                    let millis = rest.trim().parse().unwrap_or(0);
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_millis(millis)) => {}
                        _ = cancel.cancelled() => return CommandExit::stopped(),
                    }
                }
                "wait" => {
                    cancel.cancelled().await;
                    return CommandExit::stopped();
                }
                "cat" => {
                    if let Some(input) = &request.input {
                        let newline = if input.ends_with('\n') { "" } else { "\n" };
                        sink.stdout(&format!("{input}{newline}"));
                    }
                }
                "env" => {
                    let value = request
                        .environment
                        .get(rest.trim())
                        .cloned()
                        .unwrap_or_default();
                    sink.stdout(&format!("{value}\n"));
                }
                "pwd" => {
                    let dir = request
                        .working_directory
                        .as_ref()
                        .map(|d| d.display().to_string())
                        .unwrap_or_default();
                    sink.stdout(&format!("{dir}\n"));
                }
                other => {
                    sink.stderr(&format!("{other}: command not found\n"));
                    return CommandExit::exited(127);
                }
            }
        }
        CommandExit::exited(0)
    }
}

impl ExecutionEngine for ScriptEngine {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(
        &self,
        request: CommandRequest,
        sink: OutputSink,
        cancel: CancellationToken,
    ) -> Result<CommandExit, EngineError> {
        let now = self.stats.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.peak.fetch_max(now, Ordering::SeqCst);
        self.stats.record(format!("start:{}", request.command));

        let exit = self.execute(&request, &sink, &cancel).await;

        self.stats.record(format!("end:{}", request.command));
        self.stats.active.fetch_sub(1, Ordering::SeqCst);
        Ok(exit)
    }
}

/// A run context with `engine` registered and no actions.
pub fn run_context(
    engine: ScriptEngine,
    targets: IndexMap<String, TargetDefinition>,
) -> RunContext {
    let mut engines = EngineRegistry::new();
    engines.register(BoxEngine::new(engine));
    RunContext {
        run_id: Uuid::now_v7(),
        scope: Scope::default(),
        evaluator: Arc::new(JexlEvaluator::new()),
        engines,
        actions: ActionRegistry::new(),
        events: EventBus::new(256),
        targets,
    }
}

/// Like [`run_context`], registering actions through `register`.
pub fn run_context_with(
    engine: ScriptEngine,
    targets: IndexMap<String, TargetDefinition>,
    register: impl FnOnce(&mut ActionRegistry),
) -> Arc<RunContext> {
    let mut ctx = run_context(engine, targets);
    register(&mut ctx.actions);
    Arc::new(ctx)
}
