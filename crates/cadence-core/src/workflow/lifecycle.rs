//! Status state machine shared by steps, routines, and the workflow.
//!
//! A `Lifecycle` owns the current [`RunStatus`], timestamps, and terminal
//! error, plus the cancellation token that is the entity's stop signal.
//! Transitions are validated against [`RunStatus::can_transition_to`] and
//! broadcast on a `watch` channel so `stop()` callers can await the terminal
//! state.

use std::sync::{Mutex, MutexGuard, PoisonError};

use cadence_types::graph::Timing;
use cadence_types::status::RunStatus;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Terminal result handed from a unit of work to its parent.
///
/// `status` is `Idle` when the unit never started because a stop was
/// requested first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub status: RunStatus,
    pub error: Option<String>,
}

impl Outcome {
    pub fn new(status: RunStatus, error: Option<String>) -> Self {
        Self { status, error }
    }

    pub fn not_started() -> Self {
        Self::new(RunStatus::Idle, None)
    }
}

/// What a stop request found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopRequest {
    /// Never started; it now never will.
    NotStarted,
    /// Moved from Running to Stopping.
    Requested,
    /// A previous request is still in progress.
    AlreadyStopping,
    /// Already terminal.
    Finished,
}

#[derive(Debug, Clone, Default)]
pub struct LifecycleSnapshot {
    pub status: RunStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl LifecycleSnapshot {
    pub fn timing(&self) -> Timing {
        Timing::new(self.started_at, self.ended_at)
    }
}

#[derive(Debug)]
pub struct Lifecycle {
    state: Mutex<LifecycleSnapshot>,
    status: watch::Sender<RunStatus>,
    cancel: CancellationToken,
}

impl Lifecycle {
    pub fn new(cancel: CancellationToken) -> Self {
        let (status, _) = watch::channel(RunStatus::Idle);
        Self {
            state: Mutex::new(LifecycleSnapshot::default()),
            status,
            cancel,
        }
    }

    fn lock(&self) -> MutexGuard<'_, LifecycleSnapshot> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> RunStatus {
        self.lock().status
    }

    pub fn snapshot(&self) -> LifecycleSnapshot {
        self.lock().clone()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_stop_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Apply `next` if the state machine allows it. Returns whether it did.
    ///
    /// Entering `Running` is refused once a stop was requested.
    pub fn transition(&self, next: RunStatus, error: Option<String>) -> bool {
        let mut state = self.lock();
        self.apply(&mut state, next, error)
    }

    /// Move to a terminal status.
    ///
    /// While Stopping, every terminal status resolves to Stopped. Returns the
    /// status actually reached, or None when nothing changed.
    pub fn finish(&self, status: RunStatus, error: Option<String>) -> Option<RunStatus> {
        let mut state = self.lock();
        let status = if state.status == RunStatus::Stopping {
            RunStatus::Stopped
        } else {
            status
        };
        self.apply(&mut state, status, error).then_some(status)
    }

    fn apply(&self, state: &mut LifecycleSnapshot, next: RunStatus, error: Option<String>) -> bool {
        if !state.status.can_transition_to(next) {
            tracing::trace!(from = %state.status, to = %next, "transition ignored");
            return false;
        }
        if next == RunStatus::Running && self.cancel.is_cancelled() {
            return false;
        }

        let now = Utc::now();
        match next {
            RunStatus::Running => state.started_at = Some(now),
            s if s.is_terminal() => {
                state.ended_at = Some(now);
                state.error = error;
            }
            _ => {}
        }
        state.status = next;
        self.status.send_replace(next);
        true
    }

    /// Request a stop: cancels the token, and moves Running to Stopping.
    pub fn request_stop(&self) -> StopRequest {
        let mut state = self.lock();
        self.cancel.cancel();
        match state.status {
            RunStatus::Idle => StopRequest::NotStarted,
            RunStatus::Running => {
                state.status = RunStatus::Stopping;
                self.status.send_replace(RunStatus::Stopping);
                StopRequest::Requested
            }
            RunStatus::Stopping => StopRequest::AlreadyStopping,
            _ => StopRequest::Finished,
        }
    }

    /// Wait until the status is terminal.
    pub async fn wait_terminal(&self) -> RunStatus {
        let mut rx = self.status.subscribe();
        loop {
            let status = *rx.borrow_and_update();
            if status.is_terminal() {
                return status;
            }
            if rx.changed().await.is_err() {
                return self.status();
            }
        }
    }
}
