//! # notesync
//!
//! Developer CLI for the notesync engine's persisted sync ledgers.
//!
//! ## Commands
//!
//! - `status`: Show what the ledger of each scope remembers
//! - `reset`: Forget a scope's ledger (or all of them) so the next sync
//!   downloads everything again
//!
//! ## Example
//!
//! ```bash
//! # Inspect every scope of the configured account
//! notesync --config notesync.toml status
//!
//! # Inspect one linked notebook
//! notesync status --scope linked-4f2a
//!
//! # Start over
//! notesync --log debug reset
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::{reset, status};
use config::Config;

/// Developer CLI for notesync ledgers.
#[derive(Parser, Debug)]
#[command(name = "notesync")]
#[command(version, about, long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter, overrides RUST_LOG and the config file
    #[arg(long, global = true)]
    log: Option<String>,

    /// Account id, overrides the config file
    #[arg(long, global = true)]
    account: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show ledger contents per scope and kind
    Status {
        /// Only this scope (`own` or `linked-<guid>`)
        #[arg(long)]
        scope: Option<String>,
    },

    /// Clear the ledger
    Reset {
        /// Only this scope (`own` or `linked-<guid>`)
        #[arg(long)]
        scope: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(account) = cli.account {
        config.sync.account = account;
    }

    init_tracing(cli.log.as_deref(), &config)?;

    tokio::fs::create_dir_all(&config.storage.ledger_dir)
        .await
        .context("Failed to create ledger directory")?;

    match cli.command {
        Commands::Status { scope } => {
            status::run(&config, scope.as_deref()).await?;
        }
        Commands::Reset { scope } => {
            reset::run(&config, scope.as_deref()).await?;
        }
    }

    Ok(())
}

fn init_tracing(log: Option<&str>, config: &Config) -> Result<()> {
    let filter = match (log, std::env::var("RUST_LOG")) {
        (Some(directive), _) => EnvFilter::try_new(directive),
        (None, Ok(v)) if !v.trim().is_empty() => Ok(EnvFilter::from_default_env()),
        _ => EnvFilter::try_new(&config.logging.filter),
    }
    .context("Invalid log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}
