//! `cadence graph` and `cadence validate`: inspect a workflow without
//! running it.

use std::path::Path;

use anyhow::Result;
use console::style;

use cadence_types::config::GlobalConfig;
use cadence_types::graph::GraphEntry;

use super::render::stage_table;
use super::run::build_workflow;

/// Print the stage each routine would run in.
pub fn show_graph(file: &Path, config: &GlobalConfig, json: bool) -> Result<()> {
    let workflow = build_workflow(file, None, config)?;
    let graph = workflow.graph();

    if json {
        println!("{}", serde_json::to_string_pretty(&graph)?);
        return Ok(());
    }

    println!();
    println!(
        "  Workflow '{}' ({} stages, up to {} routines at once)",
        style(file.display()).cyan(),
        graph.routines.len(),
        workflow.max_concurrent_routines()
    );
    println!();
    println!("{}", stage_table(&graph));
    println!();
    Ok(())
}

/// Parse the descriptor and build its dependency graph.
pub fn validate(file: &Path, config: &GlobalConfig, json: bool, quiet: bool) -> Result<()> {
    let workflow = build_workflow(file, None, config)?;
    let graph = workflow.graph();
    let routines = graph.routines.iter().flatten().count();
    let strategies = graph
        .routines
        .iter()
        .flatten()
        .filter(|entry| matches!(entry, GraphEntry::Strategy(_)))
        .count();

    if json {
        let out = serde_json::json!({
            "valid": true,
            "routines": routines,
            "strategies": strategies,
            "stages": graph.routines.len(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else if !quiet {
        println!(
            "  {} {} is valid ({routines} routines, {} stages)",
            style("✓").green().bold(),
            style(file.display()).cyan(),
            graph.routines.len()
        );
    }
    Ok(())
}
