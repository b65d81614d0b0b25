//! Workflow event stream.
//!
//! Every status transition and output chunk is published as a
//! [`WorkflowEvent`]. Events carry a namespaced name (`running`,
//! `routine:success`, `step:output`, `end`) that observers can filter with
//! wildcard patterns.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::graph::WorkflowGraph;
use crate::status::RunStatus;

/// Identifies the routine an event belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutineRef {
    /// Display name (`build`, or `test [1]` for strategy members).
    pub name: String,
    /// Declared routine name of the owning strategy group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy_index: Option<usize>,
}

impl RoutineRef {
    pub fn plain(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            strategy: None,
            strategy_index: None,
        }
    }

    pub fn member(name: impl Into<String>, strategy: impl Into<String>, index: usize) -> Self {
        Self {
            name: name.into(),
            strategy: Some(strategy.into()),
            strategy_index: Some(index),
        }
    }
}

/// Which output stream a chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// A single event published during a workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// Workflow-level status transition.
    Workflow {
        run_id: Uuid,
        status: RunStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// Routine-level status transition.
    Routine {
        run_id: Uuid,
        routine: RoutineRef,
        status: RunStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// Step-level status transition.
    Step {
        run_id: Uuid,
        routine: RoutineRef,
        index: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        status: RunStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// A chunk of command or action output.
    Output {
        run_id: Uuid,
        routine: RoutineRef,
        index: usize,
        stream: OutputStream,
        chunk: String,
    },

    /// Final event of a run, with the complete graph snapshot.
    End {
        run_id: Uuid,
        status: RunStatus,
        graph: Box<WorkflowGraph>,
    },
}

impl WorkflowEvent {
    /// Run this event belongs to.
    pub fn run_id(&self) -> Uuid {
        match self {
            Self::Workflow { run_id, .. }
            | Self::Routine { run_id, .. }
            | Self::Step { run_id, .. }
            | Self::Output { run_id, .. }
            | Self::End { run_id, .. } => *run_id,
        }
    }

    /// Namespaced event name.
    pub fn name(&self) -> String {
        match self {
            Self::Workflow { status, .. } => status.as_str().to_string(),
            Self::Routine { status, .. } => format!("routine:{status}"),
            Self::Step { status, .. } => format!("step:{status}"),
            Self::Output { .. } => "step:output".to_string(),
            Self::End { .. } => "end".to_string(),
        }
    }

    /// Match the event name against a wildcard pattern.
    ///
    /// `*` matches every event; otherwise the pattern and the name are
    /// compared segment by segment (split on `:`), where a `*` segment
    /// matches any single segment. `routine:*` and `*:failure` are typical.
    pub fn matches(&self, pattern: &str) -> bool {
        matches_pattern(&self.name(), pattern)
    }
}

fn matches_pattern(name: &str, pattern: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    let name_parts: Vec<&str> = name.split(':').collect();
    let pattern_parts: Vec<&str> = pattern.split(':').collect();
    name_parts.len() == pattern_parts.len()
        && name_parts
            .iter()
            .zip(&pattern_parts)
            .all(|(n, p)| *p == "*" || n == p)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn routine_event(status: RunStatus) -> WorkflowEvent {
        WorkflowEvent::Routine {
            run_id: Uuid::now_v7(),
            routine: RoutineRef::member("test [0]", "test", 0),
            status,
            error: None,
        }
    }

    #[test]
    fn event_names_are_namespaced() {
        let run_id = Uuid::now_v7();
        let wf = WorkflowEvent::Workflow {
            run_id,
            status: RunStatus::Running,
            error: None,
        };
        assert_eq!(wf.name(), "running");
        assert_eq!(routine_event(RunStatus::Failure).name(), "routine:failure");

        let output = WorkflowEvent::Output {
            run_id,
            routine: RoutineRef::plain("build"),
            index: 0,
            stream: OutputStream::Stdout,
            chunk: "hi".to_string(),
        };
        assert_eq!(output.name(), "step:output");
    }

    #[test]
    fn wildcard_matching() {
        let failure = routine_event(RunStatus::Failure);
        assert!(failure.matches("*"));
        assert!(failure.matches("routine:*"));
        assert!(failure.matches("*:failure"));
        assert!(failure.matches("routine:failure"));
        assert!(!failure.matches("step:*"));
        assert!(!failure.matches("*:success"));
        assert!(!failure.matches("failure"));
    }

    #[test]
    fn workflow_level_names_do_not_match_prefixed_patterns() {
        let wf = WorkflowEvent::Workflow {
            run_id: Uuid::now_v7(),
            status: RunStatus::Failure,
            error: Some("Workflow failed".to_string()),
        };
        assert!(wf.matches("failure"));
        assert!(!wf.matches("*:failure"));
    }

    #[test]
    fn event_serializes_with_type_tag() {
        let json = serde_json::to_value(routine_event(RunStatus::Running)).unwrap();
        assert_eq!(json["type"], "routine");
        assert_eq!(json["routine"]["strategy"], "test");
        assert_eq!(json["routine"]["strategyIndex"], 0);
        assert_eq!(json["status"], "running");
    }
}
