//! BoxEngine -- object-safe dynamic dispatch wrapper for ExecutionEngine.
//!
//! 1. `ExecutionEngineDyn` is an object-safe trait with boxed futures
//! 2. Blanket-impl `ExecutionEngineDyn` for all `T: ExecutionEngine`
//! 3. `BoxEngine` wraps `Box<dyn ExecutionEngineDyn>` and delegates

use std::future::Future;
use std::pin::Pin;

use tokio_util::sync::CancellationToken;

use super::executor::{CommandExit, CommandRequest, EngineError, ExecutionEngine};
use super::output::OutputSink;

/// Object-safe version of [`ExecutionEngine`] with boxed futures.
pub trait ExecutionEngineDyn: Send + Sync {
    fn name(&self) -> &str;

    fn run_boxed<'a>(
        &'a self,
        request: CommandRequest,
        sink: OutputSink,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<CommandExit, EngineError>> + Send + 'a>>;
}

impl<T: ExecutionEngine> ExecutionEngineDyn for T {
    fn name(&self) -> &str {
        ExecutionEngine::name(self)
    }

    fn run_boxed<'a>(
        &'a self,
        request: CommandRequest,
        sink: OutputSink,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<CommandExit, EngineError>> + Send + 'a>> {
        Box::pin(self.run(request, sink, cancel))
    }
}

/// Type-erased execution engine for runtime selection by target.
pub struct BoxEngine {
    inner: Box<dyn ExecutionEngineDyn>,
}

impl BoxEngine {
    pub fn new<T: ExecutionEngine + 'static>(engine: T) -> Self {
        Self {
            inner: Box::new(engine),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub async fn run(
        &self,
        request: CommandRequest,
        sink: OutputSink,
        cancel: CancellationToken,
    ) -> Result<CommandExit, EngineError> {
        self.inner.run_boxed(request, sink, cancel).await
    }
}

impl std::fmt::Debug for BoxEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxEngine").field("name", &self.name()).finish()
    }
}
