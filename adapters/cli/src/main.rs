#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Command-line adapter that runs leveling thinning resampling scenarios.

mod cli;
mod config;
mod run;
mod scenario;
mod telemetry;

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::warn;

use crate::{
    cli::{Cli, Command, RunArgs},
    config::Scenario,
};

/// Entry point for the resampling command-line interface.
fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    telemetry::init()?;

    match cli.command {
        Command::Run(args) => run_scenario(args),
    }
}

fn run_scenario(args: RunArgs) -> Result<ExitCode> {
    let mut scenario = match &args.config {
        Some(path) => Scenario::load(path)?,
        None => Scenario::reference()?,
    };
    if let Some(seed) = args.seed {
        scenario.seed = seed;
    }
    if let Some(steps) = args.steps {
        scenario.steps = steps;
    }
    if let Some(ratio) = args.target_ratio {
        scenario.override_target_ratio(ratio)?;
    }

    let report = run::run(&scenario, args.check)?;
    if args.json {
        let json = serde_json::to_string_pretty(&report).context("failed to encode report")?;
        println!("{json}");
    } else {
        print!("{}", run::render(&report));
    }

    if args.check && !report.passed() {
        warn!("one or more checks failed");
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
