//! Execution engine port, its type-erased wrapper, and the engine registry.

pub mod box_engine;
pub mod executor;
pub mod output;
pub mod registry;

pub use box_engine::BoxEngine;
pub use executor::{CommandExit, CommandRequest, EngineError, ExecutionEngine};
pub use output::OutputSink;
pub use registry::{EngineRegistry, DEFAULT_ENGINE};
