//! Curator CLI: a concurrent fetch, validate and integrate pipeline for
//! code snippets.
//!
//! Pulls candidates from configured sources, filters them by syntax and
//! heuristic quality, and stores the survivors in a local database.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
