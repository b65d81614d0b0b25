//! Terminal rendering: the live event printer and the stage table.

use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::style;

use cadence_core::event::bus::FilteredSubscription;
use cadence_types::event::{OutputStream, WorkflowEvent};
use cadence_types::graph::{GraphEntry, RoutineGraph, WorkflowGraph};
use cadence_types::status::{DescriptorStatus, RunStatus};

// ---------------------------------------------------------------------------
// Live events
// ---------------------------------------------------------------------------

/// One printable line (or block) for an event, if it is worth showing.
pub fn format_event(event: &WorkflowEvent) -> Option<String> {
    match event {
        WorkflowEvent::Routine {
            routine,
            status,
            error,
            ..
        } => {
            let name = style(&routine.name).cyan();
            match status {
                RunStatus::Running => Some(format!("  {} {name}", style(">").blue().bold())),
                RunStatus::Success => Some(format!("  {} {name}", style("✓").green())),
                RunStatus::Skipped => Some(format!("  {} {name} (skipped)", style("-").dim())),
                RunStatus::Failure | RunStatus::Error => Some(format!(
                    "  {} {name}{}",
                    style("✗").red(),
                    error
                        .as_deref()
                        .map(|e| format!(": {}", style(e).red()))
                        .unwrap_or_default()
                )),
                RunStatus::Stopped => Some(format!("  {} {name} (stopped)", style("■").yellow())),
                RunStatus::Idle | RunStatus::Stopping => None,
            }
        }

        WorkflowEvent::Step {
            routine,
            index,
            name,
            status,
            error,
            ..
        } => {
            let label = name.clone().unwrap_or_else(|| format!("step {index}"));
            match status {
                RunStatus::Running => Some(format!(
                    "    {} {}",
                    style(&routine.name).dim(),
                    style(label).bold()
                )),
                RunStatus::Failure | RunStatus::Error => Some(format!(
                    "    {} {} {}",
                    style(&routine.name).dim(),
                    style(label).red(),
                    error.as_deref().unwrap_or_default()
                )),
                _ => None,
            }
        }

        WorkflowEvent::Output {
            routine,
            stream,
            chunk,
            ..
        } => {
            let prefix = format!("    {} |", style(&routine.name).dim());
            let lines: Vec<String> = chunk
                .trim_end_matches('\n')
                .split('\n')
                .map(|line| match stream {
                    OutputStream::Stdout => format!("{prefix} {line}"),
                    OutputStream::Stderr => format!("{prefix} {}", style(line).yellow()),
                })
                .collect();
            Some(lines.join("\n"))
        }

        WorkflowEvent::Workflow { .. } | WorkflowEvent::End { .. } => None,
    }
}

/// Print events until the run ends.
pub async fn print_events(mut events: FilteredSubscription) {
    while let Some(event) = events.recv().await {
        if matches!(event, WorkflowEvent::End { .. }) {
            break;
        }
        if let Some(line) = format_event(&event) {
            println!("{line}");
        }
    }
}

// ---------------------------------------------------------------------------
// Stage table
// ---------------------------------------------------------------------------

pub fn run_status_cell(status: RunStatus) -> Cell {
    let cell = Cell::new(status.as_str());
    match status {
        RunStatus::Idle => cell.fg(Color::DarkGrey),
        RunStatus::Running | RunStatus::Stopping => cell.fg(Color::Blue),
        RunStatus::Success => cell.fg(Color::Green),
        RunStatus::Failure | RunStatus::Error => cell.fg(Color::Red),
        RunStatus::Stopped => cell.fg(Color::Yellow),
        RunStatus::Skipped => cell.fg(Color::DarkGrey),
    }
}

pub fn descriptor_status_cell(status: DescriptorStatus) -> Cell {
    let cell = Cell::new(status.to_string());
    match status {
        DescriptorStatus::Pending => cell.fg(Color::DarkGrey),
        DescriptorStatus::Running => cell.fg(Color::Blue),
        DescriptorStatus::Success => cell.fg(Color::Green),
        DescriptorStatus::Failure => cell.fg(Color::Red),
        DescriptorStatus::Stopped | DescriptorStatus::Canceled => cell.fg(Color::Yellow),
        DescriptorStatus::Skipped => cell.fg(Color::DarkGrey),
    }
}

fn duration(routine: &RoutineGraph) -> String {
    routine
        .timing
        .measurement
        .map(|ms| format!("{:.1}s", ms as f64 / 1000.0))
        .unwrap_or_else(|| "-".to_string())
}

fn routine_row(stage: String, name: String, routine: &RoutineGraph) -> Vec<Cell> {
    vec![
        Cell::new(stage),
        Cell::new(name),
        run_status_cell(routine.status),
        Cell::new(routine.steps.len()),
        Cell::new(duration(routine)),
        Cell::new(routine.error.as_deref().unwrap_or("")),
    ]
}

/// One row per routine, strategy group, and strategy member, in stage order.
pub fn stage_table(graph: &WorkflowGraph) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Stage").fg(Color::Cyan),
            Cell::new("Routine"),
            Cell::new("Status"),
            Cell::new("Steps"),
            Cell::new("Duration"),
            Cell::new("Error"),
        ]);

    for (stage, entries) in graph.routines.iter().enumerate() {
        for entry in entries {
            match entry {
                GraphEntry::Routine(routine) => {
                    table.add_row(routine_row(
                        (stage + 1).to_string(),
                        routine.name.clone(),
                        routine,
                    ));
                }
                GraphEntry::Strategy(group) => {
                    let members = if group.strategy.is_empty() {
                        "dynamic".to_string()
                    } else {
                        group.strategy.len().to_string()
                    };
                    table.add_row(vec![
                        Cell::new(stage + 1),
                        Cell::new(format!("{} (strategy)", group.name)),
                        descriptor_status_cell(group.status),
                        Cell::new(members),
                        Cell::new("-"),
                        Cell::new(group.error.as_deref().unwrap_or("")),
                    ]);
                    for member in &group.strategy {
                        table.add_row(routine_row(
                            String::new(),
                            format!("  {}", member.routine.name),
                            &member.routine,
                        ));
                    }
                }
            }
        }
    }
    table
}
