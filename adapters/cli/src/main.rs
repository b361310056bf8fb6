#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Command-line adapter that drives the fire rescue planner over a scripted
//! scenario.

mod commands;
mod scenario;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use crate::commands::{PlanCommand, RunCommand};

/// Fire rescue planner driven over a scripted building.
#[derive(Debug, Parser)]
#[command(name = "fire-rescue", version, long_about = None)]
struct Cli {
    /// Log filter directive, overrides `RUST_LOG` (e.g. `debug` or
    /// `fire_rescue_system_execution=trace`).
    #[arg(long, global = true, value_name = "FILTER")]
    log: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Explore the building and execute the rescue until everyone found is out
    Run(RunCommand),
    /// Print the rescue plan for the fully revealed initial scenario
    Plan(PlanCommand),
}

fn init_logging(directive: Option<&str>) {
    let filter = match directive {
        Some(directive) => EnvFilter::new(directive),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Entry point for the fire rescue command-line interface.
fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log.as_deref());

    match cli.command {
        Command::Run(command) => command.execute(),
        Command::Plan(command) => command.execute(),
    }
}
