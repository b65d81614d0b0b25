//! Local execution engine: runs step commands as host shell processes.
//!
//! Each command runs as `<shell> -c <command>` with the step's merged
//! environment layered over the parent process environment. Stdout and
//! stderr are read line by line and streamed into the step's
//! [`OutputSink`] as they arrive. A cancelled token kills the child and the
//! run resolves as stopped.
//!
//! Targets may override the shell through `engineOptions`:
//!
//! ```yaml
//! targets:
//!   bash:
//!     engine: local
//!     engineOptions:
//!       shell: bash
//! ```

use std::process::Stdio;
use std::time::Duration;

use cadence_core::engine::{
    CommandExit, CommandRequest, EngineError, ExecutionEngine, OutputSink, DEFAULT_ENGINE,
};
use cadence_types::event::OutputStream;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Shell used when neither the config nor the target names one.
pub const DEFAULT_SHELL: &str = "sh";

/// How long output may keep streaming after the command exits.
const OUTPUT_DRAIN: Duration = Duration::from_millis(250);

/// Execution engine that spawns processes on the host.
#[derive(Debug, Clone)]
pub struct LocalEngine {
    shell: String,
}

impl LocalEngine {
    pub fn new() -> Self {
        Self::with_shell(DEFAULT_SHELL)
    }

    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }

    pub fn shell(&self) -> &str {
        &self.shell
    }

    /// The shell for one request: `engineOptions.shell` wins over the
    /// engine's own.
    fn shell_for<'a>(&'a self, options: Option<&'a Value>) -> Result<&'a str, EngineError> {
        let Some(options) = options else {
            return Ok(&self.shell);
        };
        let Some(map) = options.as_object() else {
            return Err(EngineError::InvalidOptions(
                "engineOptions for the local engine must be a mapping".to_string(),
            ));
        };
        match map.get("shell") {
            None | Some(Value::Null) => Ok(&self.shell),
            Some(Value::String(shell)) if !shell.is_empty() => Ok(shell),
            Some(other) => Err(EngineError::InvalidOptions(format!(
                "shell must be a non-empty string, got {other}"
            ))),
        }
    }
}

impl Default for LocalEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionEngine for LocalEngine {
    fn name(&self) -> &str {
        DEFAULT_ENGINE
    }

    async fn run(
        &self,
        request: CommandRequest,
        sink: OutputSink,
        cancel: CancellationToken,
    ) -> Result<CommandExit, EngineError> {
        if cancel.is_cancelled() {
            return Ok(CommandExit::stopped());
        }

        let shell = self.shell_for(request.options.as_ref())?;

        let mut cmd = Command::new(shell);
        cmd.arg("-c")
            .arg(&request.command)
            .envs(&request.environment)
            .stdin(if request.input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &request.working_directory {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| EngineError::Spawn(format!("{shell}: {e}")))?;
        tracing::debug!(pid = ?child.id(), shell, command = %request.command, "Spawned command");

        // Written from its own task so a child that fills its output pipes
        // before reading stdin cannot deadlock us.
        if let (Some(mut stdin), Some(input)) = (child.stdin.take(), request.input) {
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(input.as_bytes()).await {
                    tracing::debug!("Failed to write command input: {e}");
                }
            });
        }

        let stdout = child
            .stdout
            .take()
            .map(|out| tokio::spawn(pump(out, sink.clone(), OutputStream::Stdout)));
        let stderr = child
            .stderr
            .take()
            .map(|err| tokio::spawn(pump(err, sink.clone(), OutputStream::Stderr)));

        let status = tokio::select! {
            status = child.wait() => Some(status?),
            _ = cancel.cancelled() => None,
        };

        let Some(status) = status else {
            if let Err(e) = child.start_kill() {
                tracing::debug!("Failed to kill command: {e}");
            }
            let _ = child.wait().await;
            // Grandchildren may still hold the pipes open.
            for task in [stdout, stderr].into_iter().flatten() {
                task.abort();
            }
            tracing::debug!(command = %request.command, "Command stopped");
            return Ok(CommandExit::stopped());
        };

        // Background grandchildren can keep the pipes open past exit.
        let deadline = tokio::time::Instant::now() + OUTPUT_DRAIN;
        for mut task in [stdout, stderr].into_iter().flatten() {
            if tokio::time::timeout_at(deadline, &mut task).await.is_err() {
                tracing::debug!(command = %request.command, "Output still open after exit");
                task.abort();
            }
        }

        tracing::debug!(code = ?status.code(), command = %request.command, "Command exited");
        Ok(CommandExit {
            code: status.code(),
            stopped: false,
        })
    }
}

/// Forward one pipe into the sink a line at a time.
async fn pump(pipe: impl AsyncRead + Unpin, sink: OutputSink, stream: OutputStream) {
    let mut reader = BufReader::new(pipe);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => sink.write(stream, &String::from_utf8_lossy(&line)),
            Err(e) => {
                tracing::debug!("Failed to read command output: {e}");
                break;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
