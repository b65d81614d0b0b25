//! `cadence run`: execute a workflow file with the local engine.

use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use console::style;

use cadence_core::event::bus::EventBus;
use cadence_core::engine::BoxEngine;
use cadence_core::workflow::{load_workflow_file, Workflow, WorkflowOptions};
use cadence_infra::action::builtin_actions;
use cadence_infra::config::resolve_max_concurrency;
use cadence_infra::engine::LocalEngine;
use cadence_types::config::GlobalConfig;
use cadence_types::status::RunStatus;

use super::render::{print_events, stage_table};

const PRINTER_GRACE: Duration = Duration::from_secs(1);

/// Process exit code for a finished run.
pub fn exit_code(status: RunStatus) -> ExitCode {
    match status {
        RunStatus::Success | RunStatus::Skipped => ExitCode::SUCCESS,
        RunStatus::Stopped => ExitCode::from(130),
        _ => ExitCode::FAILURE,
    }
}

/// Build the workflow with the local engine and built-in actions.
pub fn build_workflow(
    file: &Path,
    max_concurrent: Option<usize>,
    config: &GlobalConfig,
) -> Result<Workflow> {
    let definition = load_workflow_file(file)
        .with_context(|| format!("Failed to load workflow from {}", file.display()))?;

    let max = resolve_max_concurrency(max_concurrent, definition.max_concurrent_routines, config);
    let mut options = WorkflowOptions::default()
        .with_engine(BoxEngine::new(LocalEngine::with_shell(config.shell.clone())))
        .with_events(EventBus::new(config.event_capacity))
        .with_max_concurrent_routines(max)
        .with_default_target(config.default_target.clone());
    for action in builtin_actions() {
        options = options.with_action(action);
    }

    Workflow::new(definition, options)
        .with_context(|| format!("Invalid workflow {}", file.display()))
}

pub async fn run_workflow(
    file: &Path,
    max_concurrent: Option<usize>,
    config: &GlobalConfig,
    json: bool,
    quiet: bool,
) -> Result<ExitCode> {
    let workflow = build_workflow(file, max_concurrent, config)?;
    tracing::info!(
        run_id = %workflow.run_id(),
        file = %file.display(),
        max_concurrent = workflow.max_concurrent_routines(),
        "running workflow"
    );

    let printer = (!json && !quiet)
        .then(|| tokio::spawn(print_events(workflow.events().subscribe_matching("*"))));

    let run = workflow.run();
    tokio::pin!(run);
    let outcome = tokio::select! {
        outcome = &mut run => outcome,
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                tracing::warn!("Failed to listen for Ctrl+C: {e}");
            }
            if !json {
                eprintln!("\n  {}", style("Stopping workflow...").yellow());
            }
            let (outcome, ()) = tokio::join!(&mut run, workflow.stop());
            outcome
        }
    };

    if let Some(printer) = printer {
        // The end event can be lost to a lagging subscriber.
        if tokio::time::timeout(PRINTER_GRACE, printer).await.is_err() {
            tracing::debug!("event printer did not see the end event");
        }
    }

    let graph = workflow.graph();
    if json {
        println!("{}", serde_json::to_string_pretty(&graph)?);
    } else if !quiet {
        println!();
        println!("{}", stage_table(&graph));
        let summary = match outcome.status {
            RunStatus::Success => style("Workflow succeeded").green().bold(),
            RunStatus::Stopped => style("Workflow was stopped").yellow().bold(),
            _ => style("Workflow failed").red().bold(),
        };
        let elapsed = graph
            .timing
            .measurement
            .map(|ms| format!(" in {:.1}s", ms as f64 / 1000.0))
            .unwrap_or_default();
        println!("  {summary}{elapsed}");
        println!();
    } else if let Some(error) = &outcome.error {
        eprintln!("{error}");
    }

    Ok(exit_code(outcome.status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn workflow_file(yaml: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();
        file
    }

    #[test]
    fn exit_codes_follow_the_final_status() {
        assert_eq!(exit_code(RunStatus::Success), ExitCode::SUCCESS);
        assert_eq!(exit_code(RunStatus::Failure), ExitCode::FAILURE);
        assert_eq!(exit_code(RunStatus::Stopped), ExitCode::from(130));
    }

    #[tokio::test]
    async fn runs_a_workflow_through_the_local_shell() {
        let file = workflow_file(
            r#"
routines:
  build:
    steps:
      - name: version
        run: echo 1.2.3
  announce:
    dependsOn: build
    steps:
      - use: output
        with:
          value: "v${{ outputs.build.version }}"
"#,
        );
        let workflow = build_workflow(file.path(), Some(2), &GlobalConfig::default()).unwrap();
        let outcome = workflow.run().await;
        assert_eq!(outcome.status, RunStatus::Success);
        let graph = workflow.graph();
        let announce = graph.find_routine("announce").unwrap();
        assert_eq!(
            announce.steps[0].output,
            Some(serde_json::json!("v1.2.3"))
        );
        assert_eq!(workflow.max_concurrent_routines(), 2);
    }

    #[tokio::test]
    async fn descriptor_concurrency_applies_without_a_flag() {
        let file = workflow_file(
            r#"
maxConcurrentRoutines: 3
routines:
  a:
    steps:
      - run: "true"
"#,
        );
        let workflow = build_workflow(file.path(), None, &GlobalConfig::default()).unwrap();
        assert_eq!(workflow.max_concurrent_routines(), 3);
    }

    #[test]
    fn missing_file_reports_the_path() {
        let err = build_workflow(
            Path::new("/nonexistent/workflow.yaml"),
            None,
            &GlobalConfig::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("/nonexistent/workflow.yaml"));
    }

    #[tokio::test]
    async fn failing_command_exits_with_failure() {
        let file = workflow_file(
            r#"
routines:
  broken:
    steps:
      - run: exit 2
"#,
        );
        let code = run_workflow(file.path(), None, &GlobalConfig::default(), true, false)
            .await
            .unwrap();
        assert_eq!(code, ExitCode::FAILURE);
    }
}
