//! CLI command implementations.

pub mod reset;
pub mod status;

use anyhow::{bail, Result};
use std::sync::Arc;
use sync_engine::{FileSettingsBackend, LedgerStore, SyncScope};

use crate::config::Config;

/// Open the ledger store of the configured account.
pub fn open_ledgers(config: &Config) -> LedgerStore {
    let backend = FileSettingsBackend::for_account(&config.storage.ledger_dir, &config.sync.account);
    tracing::debug!(path = %backend.path().display(), "Opening ledger file");
    LedgerStore::new(Arc::new(backend))
}

/// Parse a `--scope` argument (`own` or `linked-<guid>`).
pub fn parse_scope(name: &str) -> Result<SyncScope> {
    match SyncScope::from_group(name) {
        Some(scope) => Ok(scope),
        None => bail!("Unknown scope '{}': expected 'own' or 'linked-<guid>'", name),
    }
}
