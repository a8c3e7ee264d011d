//! carebot CLI: maternal-health assistant in the terminal.
//!
//! Routes messages to the questionnaire, to retrieval-backed health answers,
//! or to single-shot responders, and manages saved nutrition programs.

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
