//! Batched ancestor updates.

use super::TreeStore;
use crate::error::StorageError;
use crate::mpath::MPath;
use std::collections::BTreeSet;

/// One etag/size-delta update destined for many rows.
///
/// Built up with `send`, then applied in a single store call. The session
/// batcher groups its accumulated deltas into one batch per distinct delta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetNodesBatch {
    etag: Option<String>,
    size_delta: i64,
    targets: BTreeSet<MPath>,
}

impl SetNodesBatch {
    /// `etag` replaces the stored etag of every target when set.
    pub fn new(etag: Option<&str>, size_delta: i64) -> Self {
        Self {
            etag: etag.map(str::to_string),
            size_delta,
            targets: BTreeSet::new(),
        }
    }

    pub fn send(&mut self, path: MPath) {
        self.targets.insert(path);
    }

    pub fn extend(&mut self, paths: impl IntoIterator<Item = MPath>) {
        for p in paths {
            self.send(p);
        }
    }

    pub fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    pub fn size_delta(&self) -> i64 {
        self.size_delta
    }

    pub fn targets(&self) -> impl Iterator<Item = &MPath> {
        self.targets.iter()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Apply the batch. Returns the number of rows touched.
    pub fn close(self, store: &dyn TreeStore) -> Result<usize, StorageError> {
        if self.is_empty() {
            return Ok(0);
        }
        store.set_nodes(&self)
    }
}
