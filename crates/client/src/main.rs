//! `staking-cli` entry point.

use clap::Parser;
use staking_client::cli::{run, Cli};
use staking_client::config::load_env_file;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Env file first so RUST_LOG from it applies.
    let env_file = load_env_file();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    if let Some(path) = env_file {
        debug!(path = %path.display(), "loaded env file");
    }

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!("{e:#}");
        eprintln!("❌ {e:#}");
        std::process::exit(1);
    }
}
