//! Cadence CLI entry point.
//!
//! Binary name: `cadence`
//!
//! Parses CLI arguments, initializes tracing and configuration, then
//! dispatches to the command handler.

mod cli;

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use clap_complete::generate;

use cadence_infra::config::{default_config_path, load_global_config};
use cadence_observe::tracing_setup::{init_tracing, shutdown_tracing};
use cadence_types::config::GlobalConfig;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let otel = matches!(cli.command, Commands::Run { otel: true, .. });
    init_tracing(otel, cli.log_level())
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;

    // Shell completions don't need configuration
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "cadence", &mut std::io::stdout());
        return Ok(ExitCode::SUCCESS);
    }

    let config = match cli.config.clone().or_else(default_config_path) {
        Some(path) => load_global_config(&path).await,
        None => GlobalConfig::default(),
    };

    let result = match &cli.command {
        Commands::Run {
            file,
            max_concurrent,
            ..
        } => {
            let max_concurrent = max_concurrent
                .map(usize::try_from)
                .transpose()
                .context("--max-concurrent is out of range")?;
            cli::run::run_workflow(file, max_concurrent, &config, cli.json, cli.quiet).await
        }

        Commands::Graph { file } => {
            cli::graph::show_graph(file, &config, cli.json).map(|()| ExitCode::SUCCESS)
        }

        Commands::Validate { file } => {
            cli::graph::validate(file, &config, cli.json, cli.quiet).map(|()| ExitCode::SUCCESS)
        }

        Commands::Completions { .. } => Ok(ExitCode::SUCCESS),
    };

    shutdown_tracing();
    result
}
