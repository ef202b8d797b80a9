//! Forget the ledger of one scope or of the whole account.

use anyhow::{Context, Result};

use super::{open_ledgers, parse_scope};
use crate::config::Config;

/// Run the reset command.
pub async fn run(config: &Config, scope: Option<&str>) -> Result<()> {
    let scope = scope.map(parse_scope).transpose()?;
    let ledgers = open_ledgers(config);
    ledgers
        .reset(scope.as_ref())
        .await
        .context("Failed to reset ledger")?;

    match scope {
        Some(scope) => println!("Ledger of {} reset for account {}", scope, config.sync.account),
        None => println!("All ledgers reset for account {}", config.sync.account),
    }
    println!("The next sync downloads everything again.");
    Ok(())
}
