//! The execution engine port: runs one command to completion.
//!
//! Engines stream output through an [`OutputSink`] as it arrives and honor a
//! [`CancellationToken`] as the graceful stop request. Implementations live
//! in `cadence-infra` (local shell) or in tests (scripted engines).

use std::future::Future;
use std::path::PathBuf;

use cadence_types::definition::Environment;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::output::OutputSink;

/// A fully resolved command ready for an engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandRequest {
    /// Interpolated command string.
    pub command: String,
    /// Merged environment (step > routine > workflow).
    pub environment: Environment,
    pub working_directory: Option<PathBuf>,
    /// Written to stdin, then stdin is closed.
    pub input: Option<String>,
    /// `engineOptions` of the selected target.
    pub options: Option<Value>,
}

impl CommandRequest {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }
}

/// How a command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandExit {
    /// Exit code, if the process exited normally.
    pub code: Option<i32>,
    /// True when the command ended because a stop was requested.
    pub stopped: bool,
}

impl CommandExit {
    pub fn exited(code: i32) -> Self {
        Self {
            code: Some(code),
            stopped: false,
        }
    }

    pub fn stopped() -> Self {
        Self {
            code: None,
            stopped: true,
        }
    }

    pub fn success(&self) -> bool {
        !self.stopped && self.code == Some(0)
    }
}

/// Errors raised before or while driving a command.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Failed to spawn command: {0}")]
    Spawn(String),

    #[error("Invalid engine options: {0}")]
    InvalidOptions(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Runs commands on behalf of steps and usable actions.
///
/// Uses RPITIT for the async method; see [`super::box_engine::BoxEngine`]
/// for the object-safe wrapper stored in registries.
pub trait ExecutionEngine: Send + Sync {
    /// Engine name as referenced by target definitions.
    fn name(&self) -> &str;

    /// Run `request` to completion.
    ///
    /// Output chunks go to `sink` as they arrive. Cancelling `cancel` asks
    /// the engine to terminate the command; it must then resolve with
    /// [`CommandExit::stopped`].
    fn run(
        &self,
        request: CommandRequest,
        sink: OutputSink,
        cancel: CancellationToken,
    ) -> impl Future<Output = Result<CommandExit, EngineError>> + Send;
}
