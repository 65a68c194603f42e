//! ## skarv-cli
//! **Operational entrypoint for the event builder**
//!
//! Two modes: `run` starts the builder from a validated configuration
//! and serves until interrupted; `simulate` drives a loopback run with
//! generated contributors over the in-process transport and reports the
//! tallies at the end.

use clap::Parser;

mod commands;

use commands::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(run_args) => commands::run_live(run_args).await,
        Commands::Simulate(sim_args) => commands::run_simulation(sim_args).await,
    }
}
