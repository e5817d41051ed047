//! Undertow CLI - Command-line interface
//!
//! Runs the relay server and exposes codec detection for troubleshooting.

mod commands;

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use undertow_core::tracing_setup::{CliLogLevel, init_tracing};

#[derive(Parser)]
#[command(name = "undertow")]
#[command(about = "Low-latency media relay")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: commands::Commands,

    /// Console log level
    #[arg(long, global = true, default_value = "info")]
    log_level: CliLogLevel,

    /// Directory for the full debug log
    #[arg(long, global = true)]
    logs_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.log_level.into(), cli.logs_dir.as_deref())
        .context("Failed to initialize logging")?;

    commands::handle_command(cli.command).await
}
