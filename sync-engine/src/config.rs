//! Engine configuration.

/// Configuration for [`SyncEngine`](crate::SyncEngine).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Account the engine syncs; scopes the persisted ledger.
    pub account: String,
    /// Whether linked notebooks are downloaded and sent to.
    pub sync_linked_notebooks: bool,
    /// Whether local changes are sent after downloading.
    pub send_local_changes: bool,
    /// Maximum entities of one kind per durable batch (0 = unlimited).
    ///
    /// The ledger is persisted after every batch, so smaller batches lose
    /// less work when the process dies.
    pub max_batch_entries: usize,
    /// Capacity of the send queue.
    pub send_queue_capacity: usize,
}

impl SyncConfig {
    /// Create a configuration for an account with default settings.
    pub fn new(account: &str) -> Self {
        Self {
            account: account.to_string(),
            sync_linked_notebooks: true,
            send_local_changes: true,
            max_batch_entries: 0,
            send_queue_capacity: 256,
        }
    }

    /// Enable or disable linked notebook sync.
    pub fn with_linked_notebooks(mut self, enabled: bool) -> Self {
        self.sync_linked_notebooks = enabled;
        self
    }

    /// Enable or disable the send stage.
    pub fn with_send_local_changes(mut self, enabled: bool) -> Self {
        self.send_local_changes = enabled;
        self
    }

    /// Set the maximum entities per durable batch.
    pub fn with_max_batch_entries(mut self, max: usize) -> Self {
        self.max_batch_entries = max;
        self
    }

    /// Set the send queue capacity (at least 1).
    pub fn with_send_queue_capacity(mut self, capacity: usize) -> Self {
        self.send_queue_capacity = capacity.max(1);
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("default")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_fields() {
        let config = SyncConfig::new("alice")
            .with_linked_notebooks(false)
            .with_send_local_changes(false)
            .with_max_batch_entries(50)
            .with_send_queue_capacity(0);

        assert_eq!(config.account, "alice");
        assert!(!config.sync_linked_notebooks);
        assert!(!config.send_local_changes);
        assert_eq!(config.max_batch_entries, 50);
        assert_eq!(config.send_queue_capacity, 1);
    }

    #[test]
    fn defaults_sync_everything() {
        let config = SyncConfig::default();
        assert!(config.sync_linked_notebooks);
        assert!(config.send_local_changes);
        assert_eq!(config.max_batch_entries, 0);
    }
}
