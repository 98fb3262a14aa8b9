//! feedpress CLI: the daily property-news pipeline.
//!
//! Fetches real-estate feeds, rewrites unseen articles, writes social copy
//! and publishes the day's export to a spreadsheet. Every stage can also be
//! run on its own against the dated workspace.

mod commands;

use std::process::ExitCode;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
