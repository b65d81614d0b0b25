//! Point-in-time graph snapshot of a workflow run.
//!
//! The snapshot is a read model for observers (renderers, `--json` output).
//! `routines` is indexed by stage - 1; each inner entry is either a plain
//! routine or a strategy group with its expanded members.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::status::{DescriptorStatus, RunStatus};

/// Start/end timestamps plus elapsed milliseconds once terminal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timing {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Elapsed time in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measurement: Option<i64>,
}

impl Timing {
    pub fn new(started_at: Option<DateTime<Utc>>, ended_at: Option<DateTime<Utc>>) -> Self {
        let measurement = match (started_at, ended_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        };
        Self {
            started_at,
            ended_at,
            measurement,
        }
    }
}

/// Whole-workflow snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowGraph {
    pub run_id: Uuid,
    pub status: RunStatus,
    #[serde(flatten)]
    pub timing: Timing,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub routines: Vec<Vec<GraphEntry>>,
}

impl WorkflowGraph {
    /// Find a plain routine, or a strategy member, by display name.
    pub fn find_routine(&self, name: &str) -> Option<&RoutineGraph> {
        self.routines.iter().flatten().find_map(|entry| match entry {
            GraphEntry::Routine(r) if r.name == name => Some(r),
            GraphEntry::Routine(_) => None,
            GraphEntry::Strategy(s) => s
                .strategy
                .iter()
                .map(|m| &m.routine)
                .find(|r| r.name == name),
        })
    }

    /// Find a strategy group by its declared routine name.
    pub fn find_strategy(&self, name: &str) -> Option<&StrategyGraph> {
        self.routines.iter().flatten().find_map(|entry| match entry {
            GraphEntry::Strategy(s) if s.name == name => Some(s),
            _ => None,
        })
    }
}

/// One stage entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GraphEntry {
    Strategy(StrategyGraph),
    Routine(RoutineGraph),
}

impl GraphEntry {
    pub fn name(&self) -> &str {
        match self {
            Self::Strategy(s) => &s.name,
            Self::Routine(r) => &r.name,
        }
    }
}

/// Snapshot of one routine instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutineGraph {
    pub name: String,
    pub status: RunStatus,
    #[serde(flatten)]
    pub timing: Timing,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub steps: Vec<StepGraph>,
}

/// Snapshot of a strategy group.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyGraph {
    pub name: String,
    pub status: DescriptorStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub strategy: Vec<StrategyRoutineGraph>,
}

/// One expanded strategy member.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyRoutineGraph {
    pub index: usize,
    pub variables: Map<String, Value>,
    #[serde(flatten)]
    pub routine: RoutineGraph,
}

/// Snapshot of one step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepGraph {
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub status: RunStatus,
    #[serde(flatten)]
    pub timing: Timing,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Interpolated command string (command steps only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn routine(name: &str, status: RunStatus) -> RoutineGraph {
        RoutineGraph {
            name: name.to_string(),
            status,
            timing: Timing::default(),
            error: None,
            steps: vec![],
        }
    }

    #[test]
    fn timing_measures_elapsed_millis() {
        let start = Utc::now();
        let end = start + Duration::milliseconds(1500);
        let t = Timing::new(Some(start), Some(end));
        assert_eq!(t.measurement, Some(1500));
        assert_eq!(Timing::new(Some(start), None).measurement, None);
    }

    #[test]
    fn strategy_entry_serializes_with_members() {
        let entry = GraphEntry::Strategy(StrategyGraph {
            name: "test".to_string(),
            status: DescriptorStatus::Success,
            error: None,
            strategy: vec![StrategyRoutineGraph {
                index: 0,
                variables: json!({"os": "linux"}).as_object().cloned().unwrap(),
                routine: routine("test [0]", RunStatus::Success),
            }],
        });

        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["name"], "test");
        assert_eq!(value["strategy"][0]["name"], "test [0]");
        assert_eq!(value["strategy"][0]["variables"]["os"], "linux");
        assert_eq!(value["strategy"][0]["status"], "success");
    }

    #[test]
    fn find_routine_searches_strategy_members() {
        let graph = WorkflowGraph {
            run_id: Uuid::now_v7(),
            status: RunStatus::Running,
            timing: Timing::default(),
            error: None,
            routines: vec![
                vec![GraphEntry::Routine(routine("build", RunStatus::Success))],
                vec![GraphEntry::Strategy(StrategyGraph {
                    name: "test".to_string(),
                    status: DescriptorStatus::Running,
                    error: None,
                    strategy: vec![StrategyRoutineGraph {
                        index: 1,
                        variables: Map::new(),
                        routine: routine("test [1]", RunStatus::Running),
                    }],
                })],
            ],
        };

        assert_eq!(graph.find_routine("build").unwrap().status, RunStatus::Success);
        assert_eq!(graph.find_routine("test [1]").unwrap().status, RunStatus::Running);
        assert!(graph.find_routine("test").is_none());
        assert!(graph.find_strategy("test").is_some());
    }

    #[test]
    fn graph_json_roundtrip_keeps_entry_kinds() {
        let graph = WorkflowGraph {
            run_id: Uuid::now_v7(),
            status: RunStatus::Success,
            timing: Timing::default(),
            error: None,
            routines: vec![vec![
                GraphEntry::Routine(routine("a", RunStatus::Success)),
                GraphEntry::Strategy(StrategyGraph {
                    name: "b".to_string(),
                    status: DescriptorStatus::Success,
                    error: None,
                    strategy: vec![],
                }),
            ]],
        };
        let json = serde_json::to_string(&graph).unwrap();
        let back: WorkflowGraph = serde_json::from_str(&json).unwrap();
        assert!(matches!(back.routines[0][0], GraphEntry::Routine(_)));
        assert!(matches!(back.routines[0][1], GraphEntry::Strategy(_)));
    }
}
