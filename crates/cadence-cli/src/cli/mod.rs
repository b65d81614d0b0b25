//! CLI command definitions for the `cadence` binary.
//!
//! Uses clap derive macros for argument parsing.

pub mod graph;
pub mod render;
pub mod run;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Run dependency-ordered workflow routines.
#[derive(Parser)]
#[command(name = "cadence", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to config.toml (defaults to <config dir>/cadence/config.toml).
    #[arg(long, global = true, env = "CADENCE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a workflow file.
    Run {
        /// Path to the workflow YAML file.
        file: PathBuf,

        /// Cap on simultaneously running routines.
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        max_concurrent: Option<u64>,

        /// Export tracing spans through OpenTelemetry (stdout exporter).
        #[arg(long)]
        otel: bool,
    },

    /// Show the stages a workflow would run in.
    Graph {
        /// Path to the workflow YAML file.
        file: PathBuf,
    },

    /// Check a workflow file without running it.
    Validate {
        /// Path to the workflow YAML file.
        file: PathBuf,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

impl Cli {
    /// Default log level for the Cadence crates when `RUST_LOG` is unset.
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 if self.quiet => "error",
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        <Cli as clap::CommandFactory>::command().debug_assert();
    }

    #[test]
    fn run_accepts_global_flags_after_the_subcommand() {
        let cli = Cli::try_parse_from([
            "cadence",
            "run",
            "ci.yaml",
            "--max-concurrent",
            "2",
            "--json",
            "-vv",
        ])
        .unwrap();
        assert!(cli.json);
        assert_eq!(cli.log_level(), "debug");
        match cli.command {
            Commands::Run {
                file,
                max_concurrent,
                otel,
            } => {
                assert_eq!(file, PathBuf::from("ci.yaml"));
                assert_eq!(max_concurrent, Some(2));
                assert!(!otel);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        assert!(Cli::try_parse_from(["cadence", "run", "ci.yaml", "--max-concurrent", "0"]).is_err());
    }

    #[test]
    fn quiet_lowers_the_log_level() {
        let cli = Cli::try_parse_from(["cadence", "--quiet", "validate", "ci.yaml"]).unwrap();
        assert_eq!(cli.log_level(), "error");
    }
}
