//! Command-line arguments.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Leveling thinning particle resampling driver.
#[derive(Parser, Debug)]
#[command(name = "pic-resampling", author, version, about)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Run a resampling scenario and report the outcome
    Run(RunArgs),
}

#[derive(Args, Debug)]
pub(crate) struct RunArgs {
    /// Scenario TOML file; the built-in two-species scenario is used when omitted
    #[arg(long, value_name = "PATH")]
    pub(crate) config: Option<PathBuf>,

    /// Seed for population generation and resampling streams (overrides the scenario)
    #[arg(long)]
    pub(crate) seed: Option<u64>,

    /// Number of steps to advance (overrides the scenario)
    #[arg(long)]
    pub(crate) steps: Option<u64>,

    /// Target ratio applied to every species (overrides the scenario)
    #[arg(long, value_name = "RATIO")]
    pub(crate) target_ratio: Option<f64>,

    /// Print the report as JSON
    #[arg(long, default_value_t = false)]
    pub(crate) json: bool,

    /// Evaluate the statistical checks and exit with failure if one does not pass
    #[arg(long, default_value_t = false)]
    pub(crate) check: bool,
}
