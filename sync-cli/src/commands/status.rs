//! Show what the ledger remembers.

use anyhow::{Context, Result};
use sync_engine::{LedgerStore, SyncScope};

use super::{open_ledgers, parse_scope};
use crate::config::Config;

/// Run the status command.
pub async fn run(config: &Config, scope: Option<&str>) -> Result<()> {
    let ledgers = open_ledgers(config);
    let scopes = match scope {
        Some(name) => vec![parse_scope(name)?],
        None => ledgers.scopes().await.context("Failed to read ledger")?,
    };

    println!("=== notesync status ===");
    println!("Account: {}", config.sync.account);

    if scopes.is_empty() {
        println!();
        println!("No ledger recorded yet.");
        return Ok(());
    }

    for scope in &scopes {
        println!();
        print_scope(&ledgers, scope).await?;
    }
    Ok(())
}

async fn print_scope(ledgers: &LedgerStore, scope: &SyncScope) -> Result<()> {
    let update_count = ledgers
        .update_count(scope)
        .await
        .with_context(|| format!("Failed to read update count of {}", scope))?;
    let summary = ledgers
        .summary(scope)
        .await
        .with_context(|| format!("Failed to read ledger of {}", scope))?;

    println!("Scope {} (update count {}):", scope, update_count);
    println!(
        "  {:<14} {:>9} {:>8} {:>8} {:>8} {:>8} {:>9}",
        "kind", "processed", "expunged", "exp-fail", "dl-fail", "failed", "cancelled"
    );
    for (kind, counts) in &summary {
        println!(
            "  {:<14} {:>9} {:>8} {:>8} {:>8} {:>8} {:>9}",
            kind.as_str(),
            counts.processed,
            counts.expunged,
            counts.failed_to_expunge,
            counts.failed_to_download,
            counts.failed_to_process,
            counts.cancelled
        );
    }
    Ok(())
}
