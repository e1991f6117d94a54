//! symmsyncd — the block-synchronization daemon.
//!
//! Startup sequence:
//!   1. Load environment (.env supported) and configuration
//!   2. Connect to Postgres and ensure the schema
//!   3. Log in every configured account, spaced to respect login limits
//!   4. Launch one Commit Consumer and one Reconciler per agent
//!   5. Run until SIGINT/SIGTERM, then shut down with bounded joins

mod orchestrator;

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use symmsync_core::config::Config;

#[derive(Parser, Debug)]
#[command(
    name = "symmsyncd",
    version,
    about = "Multi-account AT Protocol block-synchronization service"
)]
struct Args {
    /// Explicit .env file to load before reading configuration.
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Run one full synchronization cycle for every account, then exit.
    #[arg(long)]
    once: bool,

    /// Directory for per-handle session files (LOCAL_TEST mode only).
    #[arg(long, default_value = ".")]
    session_dir: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match &args.env_file {
        Some(path) => {
            dotenvy::from_path(path)
                .with_context(|| format!("loading env file {}", path.display()))?;
        }
        None => {
            // A missing .env is fine; the environment may be fully populated.
            let _ = dotenvy::dotenv();
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,symmsync=debug".parse().expect("static filter")),
        )
        .init();

    let config = Config::from_env().context("reading configuration from environment")?;
    info!(
        accounts = config.secondaries.len() + 1,
        once = args.once,
        "symmsyncd starting"
    );

    orchestrator::run(config, args.once, args.session_dir).await
}
