//! Harvester CLI — multi-source research content ingestion.
//!
//! Plans and runs concurrent fetches from web pages, arXiv and PubMed for a
//! topic, then prints or saves the deduplicated, quality-filtered result.

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
