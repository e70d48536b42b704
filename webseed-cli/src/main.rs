//! WebSeed CLI - Command-line interface
//!
//! Inspects HTTP mirrors and pulls pieces through a web seed connection.

mod commands;

use std::path::PathBuf;

use clap::Parser;
use webseed_core::tracing_setup::{CliLogLevel, init_tracing};

#[derive(Parser)]
#[command(name = "webseed")]
#[command(about = "Serve BitTorrent pieces from an HTTP mirror")]
struct Cli {
    /// Piece length in bytes (defaults to WEBSEED_PIECE_LENGTH or 256 KiB)
    #[arg(long, global = true)]
    piece_length: Option<u32>,

    /// Console log level
    #[arg(long, global = true, value_enum, default_value_t = CliLogLevel::Info)]
    log_level: CliLogLevel,

    /// Directory for the full trace log
    #[arg(long, global = true)]
    logs_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: commands::Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.log_level.as_tracing_level(), cli.logs_dir.as_deref())
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))?;

    commands::handle_command(cli.command, cli.piece_length).await
}
