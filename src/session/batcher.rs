//! Session Batcher
//!
//! Buffers ancestor size deltas and change events for the lifetime of a bulk
//! session and applies them in one pass at flush.

use crate::error::StorageError;
use crate::events::{EventPublisher, NodeChangeEvent};
use crate::mpath::MPath;
use crate::store::{SetNodesBatch, TreeStore};
use crate::types::DIRTY_ETAG;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Default)]
pub struct SessionBatcher {
    deltas: Mutex<BTreeMap<MPath, i64>>,
    events: Mutex<Vec<NodeChangeEvent>>,
}

/// What a flush applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchFlush {
    pub paths: usize,
    pub batches: usize,
    pub events: usize,
}

impl SessionBatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold an event until the next flush.
    pub fn notify(&self, event: NodeChangeEvent) {
        self.events.lock().push(event);
    }

    /// Accumulate a size delta against one ancestor. The ancestor is marked
    /// dirty at flush even when its deltas cancel out.
    pub fn update_mpath(&self, path: MPath, size_delta: i64) {
        *self.deltas.lock().entry(path).or_insert(0) += size_delta;
    }

    /// Drop the pending deltas of `root` and its descendants, so a rank freed
    /// by a deletion does not inherit them. Returns how many were dropped.
    pub fn forget_subtree(&self, root: &MPath) -> usize {
        let mut deltas = self.deltas.lock();
        let before = deltas.len();
        deltas.retain(|path, _| path != root && !path.is_descendant_of(root));
        before - deltas.len()
    }

    /// Re-key the pending deltas of a moved subtree onto its new location.
    pub fn rebase_subtree(&self, from: &MPath, to: &MPath) {
        let mut deltas = self.deltas.lock();
        let moved: Vec<(MPath, MPath)> = deltas
            .keys()
            .filter_map(|path| path.rebase(from, to).map(|target| (path.clone(), target)))
            .collect();
        let mut carried = Vec::with_capacity(moved.len());
        for (old, new) in moved {
            if let Some(delta) = deltas.remove(&old) {
                carried.push((new, delta));
            }
        }
        for (path, delta) in carried {
            *deltas.entry(path).or_insert(0) += delta;
        }
    }

    pub fn pending(&self) -> (usize, usize) {
        (self.deltas.lock().len(), self.events.lock().len())
    }

    /// Apply every pending delta, one batch per distinct delta value, then
    /// publish the buffered events in arrival order.
    ///
    /// Batches the store rejects are put back; events are only published once
    /// every delta has been applied.
    pub fn flush(
        &self,
        store: &dyn TreeStore,
        publisher: &dyn EventPublisher,
    ) -> Result<BatchFlush, StorageError> {
        let deltas = std::mem::take(&mut *self.deltas.lock());
        let mut grouped: BTreeMap<i64, SetNodesBatch> = BTreeMap::new();
        for (path, delta) in &deltas {
            grouped
                .entry(*delta)
                .or_insert_with(|| SetNodesBatch::new(Some(DIRTY_ETAG), *delta))
                .send(path.clone());
        }

        let mut result = BatchFlush {
            paths: deltas.len(),
            batches: grouped.len(),
            events: 0,
        };
        let batches: Vec<SetNodesBatch> = grouped.into_values().collect();
        for (i, batch) in batches.iter().enumerate() {
            if let Err(e) = store.set_nodes(batch) {
                let mut pending = self.deltas.lock();
                for unapplied in &batches[i..] {
                    for path in unapplied.targets() {
                        *pending.entry(path.clone()).or_insert(0) += unapplied.size_delta();
                    }
                }
                return Err(e);
            }
        }

        let events = std::mem::take(&mut *self.events.lock());
        result.events = events.len();
        for event in events {
            publisher.publish(event);
        }
        debug!(
            paths = result.paths,
            batches = result.batches,
            events = result.events,
            "Flushed session batcher"
        );
        Ok(result)
    }
}
