//! `weft`: a personal agent in your terminal.

mod args;
mod chat;
mod commands;

use clap::Parser;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("{0}")]
    Usage(String),
    #[error(transparent)]
    Store(#[from] weft::StoreError),
    #[error(transparent)]
    Step(#[from] weft::StepError),
    #[error(transparent)]
    Provider(#[from] weft::ProviderError),
    #[error(transparent)]
    Tool(#[from] weft::ToolError),
    #[error(transparent)]
    Config(#[from] config::LoadError),
}

#[tokio::main]
async fn main() {
    let parsed = args::Args::parse();

    let default_level = if parsed.verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = config::load_and_apply("weft", None) {
        tracing::warn!("config load failed: {}", e);
    }

    let verbose = parsed.verbose;
    let result = async {
        let cli = chat::ChatCli::setup(parsed)?;
        cli.run().await
    }
    .await;

    if let Err(e) = result {
        if verbose {
            eprintln!("error: {e:?}");
        } else {
            eprintln!("error: {e}");
        }
        std::process::exit(1);
    }
}
