//! Output capture for a running step.
//!
//! An [`OutputSink`] accumulates stdout/stderr chunks into the step's capture
//! buffers and, when attached to an event bus, publishes one `step:output`
//! event per chunk.

use std::sync::{Arc, Mutex, PoisonError};

use cadence_types::event::{OutputStream, RoutineRef, WorkflowEvent};
use uuid::Uuid;

use crate::event::bus::EventBus;

#[derive(Debug, Default)]
struct Captured {
    stdout: String,
    stderr: String,
}

#[derive(Debug, Clone)]
struct Emitter {
    bus: EventBus,
    run_id: Uuid,
    routine: RoutineRef,
    index: usize,
}

/// Shared, cloneable output buffer for one step.
#[derive(Debug, Clone, Default)]
pub struct OutputSink {
    captured: Arc<Mutex<Captured>>,
    emitter: Option<Emitter>,
}

impl OutputSink {
    /// A sink that only captures; no events are published.
    pub fn detached() -> Self {
        Self::default()
    }

    /// A sink that captures and publishes `step:output` events.
    pub fn attached(bus: EventBus, run_id: Uuid, routine: RoutineRef, index: usize) -> Self {
        Self {
            captured: Arc::default(),
            emitter: Some(Emitter {
                bus,
                run_id,
                routine,
                index,
            }),
        }
    }

    pub fn write(&self, stream: OutputStream, chunk: &str) {
        if chunk.is_empty() {
            return;
        }
        {
            let mut captured = self.captured.lock().unwrap_or_else(PoisonError::into_inner);
            match stream {
                OutputStream::Stdout => captured.stdout.push_str(chunk),
                OutputStream::Stderr => captured.stderr.push_str(chunk),
            }
        }
        if let Some(emitter) = &self.emitter {
            emitter.bus.publish(WorkflowEvent::Output {
                run_id: emitter.run_id,
                routine: emitter.routine.clone(),
                index: emitter.index,
                stream,
                chunk: chunk.to_string(),
            });
        }
    }

    pub fn stdout(&self, chunk: &str) {
        self.write(OutputStream::Stdout, chunk);
    }

    pub fn stderr(&self, chunk: &str) {
        self.write(OutputStream::Stderr, chunk);
    }

    /// Everything written to stdout so far.
    pub fn stdout_text(&self) -> String {
        self.captured
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .stdout
            .clone()
    }

    /// Everything written to stderr so far.
    pub fn stderr_text(&self) -> String {
        self.captured
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .stderr
            .clone()
    }
}
