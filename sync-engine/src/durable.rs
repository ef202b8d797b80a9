//! Resumable processing on top of [`SyncChunkProcessor`].
//!
//! A session first replays whatever failed in previous sessions, then
//! processes the caller's chunks minus what the ledger says is already
//! done. The ledger is rewritten after every batch, so a crash loses at
//! most the batch in flight.

use std::sync::Arc;
use sync_core::{collect, KindLedger, Progress, Status};
use sync_types::{SyncChunk, SyncEntity};

use crate::error::{SyncError, SyncResult};
use crate::ledger_store::{LedgerStore, SyncScope};
use crate::processor::{ProgressCallback, SyncChunkProcessor};

/// Wraps a processor with a persisted ledger of one kind in one scope.
pub struct DurableProcessor<K: SyncEntity> {
    processor: SyncChunkProcessor<K>,
    ledgers: Arc<LedgerStore>,
    scope: SyncScope,
    max_batch_entries: usize,
}

impl<K: SyncEntity> DurableProcessor<K> {
    /// Create a durable processor. Batches are unlimited by default.
    pub fn new(processor: SyncChunkProcessor<K>, ledgers: Arc<LedgerStore>, scope: SyncScope) -> Self {
        Self {
            processor,
            ledgers,
            scope,
            max_batch_entries: 0,
        }
    }

    /// Persist the ledger after at most `max` entries of the kind
    /// (0 = after the whole input). A chunk is never split.
    pub fn with_max_batch_entries(mut self, max: usize) -> Self {
        self.max_batch_entries = max;
        self
    }

    /// The wrapped processor.
    pub fn processor(&self) -> &SyncChunkProcessor<K> {
        &self.processor
    }

    /// Replay previous failures, then process `chunks`.
    ///
    /// Returns the status of replay and current work combined. A tag
    /// cycle fails the call after its batch was recorded as failed in the
    /// ledger, so it is retried next session.
    pub async fn process_durable(
        &self,
        chunks: &[SyncChunk],
        progress: Option<ProgressCallback>,
    ) -> SyncResult<Status<K>> {
        let mut ledger = self.ledgers.load::<K>(&self.scope).await?;
        let mut total = Status::default();

        if let Some(replay) = ledger.take_replay(chunks) {
            tracing::info!(
                scope = %self.scope,
                kind = %K::KIND,
                items = replay.items,
                expunges = replay.expunges,
                "Replaying failures of previous sessions"
            );
            self.run_batch(
                std::slice::from_ref(&replay.chunk),
                &mut ledger,
                &mut total,
                &progress,
            )
            .await?;
        }

        let (fresh, skipped) = ledger.without_processed(chunks);
        if skipped > 0 {
            tracing::debug!(
                scope = %self.scope,
                kind = %K::KIND,
                skipped,
                "Skipping entries already processed"
            );
        }

        for batch in self.batches(fresh) {
            self.run_batch(&batch, &mut ledger, &mut total, &progress)
                .await?;
        }

        Ok(total)
    }

    async fn run_batch(
        &self,
        batch: &[SyncChunk],
        ledger: &mut KindLedger<K>,
        total: &mut Status<K>,
        progress: &Option<ProgressCallback>,
    ) -> SyncResult<()> {
        let offset = total.progress;
        let callback = progress.clone().map(|callback| {
            Arc::new(move |p: Progress| callback(offset.merged(p))) as ProgressCallback
        });

        let (status, failure) = match self.processor.process(batch, callback).await {
            Ok(status) => (status, None),
            Err(err) => (abandoned(batch, &err), Some(err)),
        };

        ledger.merge_status(&status);
        self.ledgers.save(&self.scope, ledger).await?;
        total.merge(status);

        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Group chunks into batches of at most `max_batch_entries` entries.
    fn batches(&self, chunks: Vec<SyncChunk>) -> Vec<Vec<SyncChunk>> {
        let mut batches = Vec::new();
        let mut current = Vec::new();
        let mut size = 0;
        for chunk in chunks {
            let entries = K::chunk_items(&chunk).len() + K::chunk_expunged(&chunk).len();
            if entries == 0 {
                continue;
            }
            if self.max_batch_entries > 0
                && !current.is_empty()
                && size + entries > self.max_batch_entries
            {
                batches.push(std::mem::take(&mut current));
                size = 0;
            }
            size += entries;
            current.push(chunk);
        }
        if !current.is_empty() {
            batches.push(current);
        }
        batches
    }
}

/// Status recording every entry of a batch that failed as a whole.
fn abandoned<K: SyncEntity>(batch: &[SyncChunk], err: &SyncError) -> Status<K> {
    let collected = collect::<K>(batch);
    let mut status = Status::new(collected.items.len(), collected.expunged.len());
    let error = err.to_item_error();
    for item in collected.items {
        status.record_failed_to_process(item, error.clone());
    }
    for guid in collected.expunged {
        status.record_failed_to_expunge(guid, error.clone());
    }
    status
}
