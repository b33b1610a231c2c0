//! Sluice CLI
//!
//! Synthesizes, plans and locally rehearses the Glue ETL pipeline stack.

mod commands;
mod config;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use config::Config;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "sluice")]
#[command(about = "Sluice Glue ETL pipeline CLI", long_about = None)]
struct Cli {
    /// Stack configuration file (JSON)
    #[arg(long, global = true, env = "SLUICE_CONFIG")]
    config: Option<PathBuf>,

    /// Secrets file (JSON); secrets are read from the environment otherwise
    #[arg(long, global = true, env = "SLUICE_SECRETS")]
    secrets: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sluice_core=info,sluice_runner=info,sluice=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref(), cli.secrets)?;

    handle_command(cli.command, &config).await
}
