//! `imagegen`: stream image generations and edits, browse the gallery.

mod args;
mod commands;

use std::process::ExitCode;

use clap::Parser as _;

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    imagegen_client::init_observability();

    let cli = args::Cli::parse();
    match commands::run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::debug!(event = "cli.failed", error = ?err);
            eprintln!("{err:#}");
            ExitCode::FAILURE
        }
    }
}
