//! Run status state machine shared by steps, routines, and workflows.
//!
//! ```text
//! Idle -> Running -> { Success, Failure, Error, Stopped }
//! Running -> Stopping -> Stopped
//! Idle -> Skipped
//! Idle -> Error
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// RunStatus
// ---------------------------------------------------------------------------

/// Lifecycle status of a step, routine, or workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Idle,
    Running,
    Stopping,
    Success,
    Failure,
    Error,
    Stopped,
    Skipped,
}

impl RunStatus {
    /// Whether no further transition can happen from this status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Success | Self::Failure | Self::Error | Self::Stopped | Self::Skipped
        )
    }

    /// Whether this status counts as a completed-without-failure outcome.
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Success | Self::Skipped)
    }

    /// Whether the transition `self -> next` is allowed.
    ///
    /// `Error` is reachable from `Idle` because setup faults (bad target,
    /// invalid strategy) are detected before anything starts running.
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        use RunStatus::*;
        match (self, next) {
            (Idle, Running | Skipped | Error) => true,
            (Running, Success | Failure | Error | Stopped | Stopping) => true,
            (Stopping, Stopped) => true,
            _ => false,
        }
    }

    /// Lowercase event-name form (`running`, `success`, ...).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Error => "error",
            Self::Stopped => "stopped",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when parsing an unknown status string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown run status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for RunStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(Self::Idle),
            "running" => Ok(Self::Running),
            "stopping" => Ok(Self::Stopping),
            "success" => Ok(Self::Success),
            "failure" => Ok(Self::Failure),
            "error" => Ok(Self::Error),
            "stopped" => Ok(Self::Stopped),
            "skipped" => Ok(Self::Skipped),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// DescriptorStatus
// ---------------------------------------------------------------------------

/// Scheduling status of a run descriptor.
///
/// Overlays [`RunStatus`] with the queueing states `Pending` and `Canceled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DescriptorStatus {
    #[default]
    Pending,
    Running,
    Success,
    Skipped,
    Failure,
    Stopped,
    Canceled,
}

impl DescriptorStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }

    /// Whether dependents waiting on this descriptor may proceed.
    pub fn unblocks_dependents(&self) -> bool {
        matches!(self, Self::Success | Self::Skipped)
    }
}

impl fmt::Display for DescriptorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Skipped => "skipped",
            Self::Failure => "failure",
            Self::Stopped => "stopped",
            Self::Canceled => "canceled",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(!RunStatus::Idle.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(!RunStatus::Stopping.is_terminal());
        for s in [
            RunStatus::Success,
            RunStatus::Failure,
            RunStatus::Error,
            RunStatus::Stopped,
            RunStatus::Skipped,
        ] {
            assert!(s.is_terminal(), "{s} should be terminal");
        }
    }

    #[test]
    fn allowed_transitions() {
        assert!(RunStatus::Idle.can_transition_to(RunStatus::Running));
        assert!(RunStatus::Idle.can_transition_to(RunStatus::Skipped));
        assert!(RunStatus::Running.can_transition_to(RunStatus::Stopping));
        assert!(RunStatus::Stopping.can_transition_to(RunStatus::Stopped));
        assert!(RunStatus::Running.can_transition_to(RunStatus::Failure));
    }

    #[test]
    fn rejected_transitions() {
        assert!(!RunStatus::Skipped.can_transition_to(RunStatus::Running));
        assert!(!RunStatus::Success.can_transition_to(RunStatus::Failure));
        assert!(!RunStatus::Stopping.can_transition_to(RunStatus::Success));
        assert!(!RunStatus::Idle.can_transition_to(RunStatus::Stopping));
        assert!(!RunStatus::Running.can_transition_to(RunStatus::Skipped));
        assert!(!RunStatus::Idle.can_transition_to(RunStatus::Stopped));
    }

    #[test]
    fn status_string_roundtrip() {
        for s in [RunStatus::Idle, RunStatus::Stopping, RunStatus::Skipped] {
            assert_eq!(s.as_str().parse::<RunStatus>().unwrap(), s);
        }
        assert!("bogus".parse::<RunStatus>().is_err());
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&RunStatus::Stopping).unwrap();
        assert_eq!(json, "\"stopping\"");
        let json = serde_json::to_string(&DescriptorStatus::Canceled).unwrap();
        assert_eq!(json, "\"canceled\"");
    }

    #[test]
    fn descriptor_status_gates() {
        assert!(DescriptorStatus::Skipped.unblocks_dependents());
        assert!(!DescriptorStatus::Failure.unblocks_dependents());
        assert!(!DescriptorStatus::Pending.is_terminal());
        assert!(DescriptorStatus::Canceled.is_terminal());
    }
}
