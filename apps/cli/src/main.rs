//! BlogPostGen CLI: blog content pipeline orchestration.
//!
//! Imports content plans as seed articles and pushes them through named
//! pipelines backed by a remote generation service.

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
