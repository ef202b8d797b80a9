//! Gathering one kind's changes out of a batch of sync chunks.

use std::collections::{HashMap, HashSet};
use sync_types::{Guid, SyncChunk, SyncEntity};

/// Entities and expunged guids of one kind, ready to process.
#[derive(Debug, Clone, PartialEq)]
pub struct Collected<K> {
    /// Created or updated entities, in first-seen order.
    pub items: Vec<K>,
    /// Expunged guids, deduplicated.
    pub expunged: Vec<Guid>,
}

impl<K> Collected<K> {
    /// Whether there is nothing to do.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.expunged.is_empty()
    }
}

/// Collect entities of kind `K` and their expunged guids across `chunks`.
///
/// - An entity whose guid is also expunged in the batch is dropped.
/// - The same guid offered twice keeps the copy with the higher USN
///   (the later one on a tie).
/// - For hierarchical kinds, entities whose parent is expunged in the
///   batch are dropped too.
pub fn collect<K: SyncEntity>(chunks: &[SyncChunk]) -> Collected<K> {
    let mut expunged = Vec::new();
    let mut expunged_set: HashSet<&Guid> = HashSet::new();
    for chunk in chunks {
        for guid in K::chunk_expunged(chunk) {
            if expunged_set.insert(guid) {
                expunged.push(guid.clone());
            }
        }
    }

    let mut items: Vec<K> = Vec::new();
    let mut by_guid: HashMap<Guid, usize> = HashMap::new();
    for chunk in chunks {
        for item in K::chunk_items(chunk) {
            let Some(guid) = item.guid() else {
                items.push(item.clone());
                continue;
            };
            if expunged_set.contains(guid) {
                continue;
            }
            if K::HIERARCHICAL && item.parent_guid().is_some_and(|p| expunged_set.contains(p)) {
                continue;
            }
            match by_guid.get(guid) {
                Some(&index) if items[index].usn() <= item.usn() => {
                    items[index] = item.clone();
                }
                Some(_) => {}
                None => {
                    by_guid.insert(guid.clone(), items.len());
                    items.push(item.clone());
                }
            }
        }
    }

    Collected { items, expunged }
}
