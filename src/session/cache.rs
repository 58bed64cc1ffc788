//! Bulk-Session Cache
//!
//! Read/write overlay in front of a [`TreeStore`] for mass indexation. Reads are
//! served from an in-memory [`Mirror`]; `add_node` updates the mirror and queues
//! the insert on an [`AddNodeStream`] drained by a single worker. Other writes go
//! through to the store synchronously once pending inserts have settled.

use super::mirror::Mirror;
use crate::error::StorageError;
use crate::mpath::{first_available_rank, MPath};
use crate::store::{add_node_stream, AddNodeStream, NodeStream, SetNodesBatch, TreeStore};
use crate::types::{ChildrenCounts, TreeNode};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct SessionCache {
    store: Arc<dyn TreeStore>,
    mirror: RwLock<Mirror>,
    inserts: Mutex<Option<AddNodeStream>>,
    /// Failures of streams already drained by a write-through.
    failures: Mutex<Vec<StorageError>>,
    buffer: usize,
}

impl SessionCache {
    /// Mirror the whole store and start the insert worker.
    pub fn new(store: Arc<dyn TreeStore>, buffer: usize) -> Result<Self, StorageError> {
        let mirror = load_mirror(store.as_ref())?;
        let stream = add_node_stream(Arc::clone(&store), buffer)?;
        info!(nodes = mirror.len(), buffer, "Opened session cache");
        Ok(Self {
            store,
            mirror: RwLock::new(mirror),
            inserts: Mutex::new(Some(stream)),
            failures: Mutex::new(Vec::new()),
            buffer,
        })
    }

    /// Number of mirrored nodes, root included.
    pub fn len(&self) -> usize {
        self.mirror.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lookup by the names of each level below the root.
    pub fn get_node_by_path(&self, names: &[&str]) -> Result<TreeNode, StorageError> {
        self.mirror.read().by_names(names).cloned()
    }

    /// Drain queued inserts into the store and start a fresh stream.
    ///
    /// Failures are kept for the next `flush`.
    fn settle(&self) -> Result<(), StorageError> {
        let mut inserts = self.inserts.lock();
        let Some(stream) = inserts.take() else {
            return Err(StorageError::Internal("session cache is closed".to_string()));
        };
        let failures = stream.finish();
        if !failures.is_empty() {
            warn!(count = failures.len(), "Queued inserts failed before write-through");
            self.failures.lock().extend(failures);
        }
        *inserts = Some(add_node_stream(Arc::clone(&self.store), self.buffer)?);
        Ok(())
    }
}

fn load_mirror(store: &dyn TreeStore) -> Result<Mirror, StorageError> {
    let root = store.get_node(&MPath::root())?;
    let nodes = store.get_node_tree(&root.mpath)?;
    Ok(Mirror::from_nodes(std::iter::once(root).chain(nodes)))
}

impl TreeStore for SessionCache {
    fn add_node(&self, node: &TreeNode) -> Result<(), StorageError> {
        let mut mirror = self.mirror.write();
        if let Some(parent) = node.mpath.parent() {
            if !mirror.contains(&parent) {
                return Err(StorageError::NotFound(format!(
                    "parent {} of {} does not exist",
                    parent, node.name
                )));
            }
        }
        if mirror.contains(&node.mpath) {
            return Err(StorageError::Conflict(format!(
                "node {} at {}",
                node.name, node.mpath
            )));
        }
        if mirror.by_uuid(&node.uuid).is_some() {
            return Err(StorageError::Conflict(format!("node identifier {}", node.uuid)));
        }

        // Enqueue under the mirror lock so a child is never queued before its parent.
        let inserts = self.inserts.lock();
        let stream = inserts
            .as_ref()
            .ok_or_else(|| StorageError::Internal("session cache is closed".to_string()))?;
        stream.send(node.clone())?;
        mirror.insert(node.clone());
        Ok(())
    }

    fn set_node(&self, node: &TreeNode) -> Result<(), StorageError> {
        self.settle()?;
        self.store.set_node(node)?;
        self.mirror.write().insert(node.clone());
        Ok(())
    }

    fn set_nodes(&self, batch: &SetNodesBatch) -> Result<usize, StorageError> {
        self.settle()?;
        let touched = self.store.set_nodes(batch)?;
        let mut mirror = self.mirror.write();
        for target in batch.targets() {
            if let Some(node) = mirror.get_mut(target) {
                node.size += batch.size_delta();
                if let Some(etag) = batch.etag() {
                    node.etag = etag.to_string();
                }
            }
        }
        Ok(touched)
    }

    fn del_node(&self, node: &TreeNode) -> Result<(), StorageError> {
        self.settle()?;
        self.store.del_node(node)?;
        self.mirror.write().remove(&node.mpath);
        Ok(())
    }

    fn get_node(&self, path: &MPath) -> Result<TreeNode, StorageError> {
        self.mirror
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("no cached node at {}", path)))
    }

    fn get_node_by_uuid(&self, uuid: &str) -> Result<TreeNode, StorageError> {
        self.mirror
            .read()
            .by_uuid(uuid)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("no cached node with uuid {}", uuid)))
    }

    fn get_node_child(&self, parent: &MPath, name: &str) -> Result<TreeNode, StorageError> {
        self.mirror
            .read()
            .child_named(parent, name)
            .cloned()
            .ok_or_else(|| {
                StorageError::NotFound(format!("no cached child {:?} under {}", name, parent))
            })
    }

    fn get_node_children(&self, parent: &MPath) -> Result<NodeStream, StorageError> {
        Ok(self.mirror.read().children(parent).into_iter())
    }

    fn get_node_tree(&self, root: &MPath) -> Result<NodeStream, StorageError> {
        Ok(self.mirror.read().descendants(root).into_iter())
    }

    fn get_node_last_child(&self, parent: &MPath) -> Result<TreeNode, StorageError> {
        let mirror = self.mirror.read();
        mirror
            .child_ranks(parent)
            .last()
            .and_then(|rank| mirror.get(&parent.child(*rank)))
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("no children under {}", parent)))
    }

    fn get_node_first_available_child_index(&self, parent: &MPath) -> Result<u64, StorageError> {
        Ok(first_available_rank(&self.mirror.read().child_ranks(parent)))
    }

    fn get_node_children_count(&self, parent: &MPath) -> Result<usize, StorageError> {
        Ok(self.mirror.read().child_ranks(parent).len())
    }

    fn get_node_children_counts(&self, parent: &MPath) -> Result<ChildrenCounts, StorageError> {
        let mut counts = ChildrenCounts::default();
        for child in self.mirror.read().children(parent) {
            if child.is_leaf() {
                counts.leaves += 1;
            } else {
                counts.collections += 1;
            }
        }
        Ok(counts)
    }

    fn move_node_tree(&self, from: &TreeNode, to: &TreeNode) -> Result<(), StorageError> {
        self.settle()?;
        self.store.move_node_tree(from, to)?;

        let mut mirror = self.mirror.write();
        let subtree = mirror.descendants(&from.mpath);
        for node in &subtree {
            mirror.remove(&node.mpath);
        }
        mirror.remove(&from.mpath);
        for stale in mirror.descendants(&to.mpath) {
            mirror.remove(&stale.mpath);
        }
        mirror.remove(&to.mpath);

        let mut moved = from.clone();
        moved.mpath = to.mpath.clone();
        moved.name = to.name.clone();
        mirror.insert(moved);
        for mut node in subtree {
            if let Some(path) = node.mpath.rebase(&from.mpath, &to.mpath) {
                node.mpath = path;
                mirror.insert(node);
            }
        }
        debug!(from = %from.mpath, to = %to.mpath, "Moved cached subtree");
        Ok(())
    }

    /// Drain the insert queue. Unless `final_flush`, the mirror is then rebuilt
    /// from the store and a new queue started so the session can continue.
    fn flush(&self, final_flush: bool) -> Result<(), StorageError> {
        let mut failures: Vec<StorageError> = std::mem::take(&mut *self.failures.lock());
        {
            // same lock order as add_node: mirror, then queue
            let mut mirror = self.mirror.write();
            let mut inserts = self.inserts.lock();
            if let Some(stream) = inserts.take() {
                failures.extend(stream.finish());
            }
            if !final_flush {
                match add_node_stream(Arc::clone(&self.store), self.buffer) {
                    Ok(stream) => *inserts = Some(stream),
                    Err(e) => {
                        warn!(error = %e, "Could not restart the insert queue");
                        failures.push(e);
                    }
                }
                // on failure the previous mirror stays; it already holds every drained insert
                match load_mirror(self.store.as_ref()) {
                    Ok(fresh) => {
                        *mirror = fresh;
                        info!(nodes = mirror.len(), "Resynced session cache from store");
                    }
                    Err(e) => {
                        warn!(error = %e, "Session cache rebuild failed, keeping current mirror");
                        failures.push(e);
                    }
                }
            }
        }
        if let Err(e) = self.store.flush(final_flush) {
            failures.push(e);
        }

        if failures.is_empty() {
            debug!(final_flush, "Flushed session cache");
            Ok(())
        } else {
            warn!(count = failures.len(), final_flush, "Session flush collected insert failures");
            Err(StorageError::Batch(
                failures.into_iter().map(|e| e.to_string()).collect(),
            ))
        }
    }

    fn clean_resources_on_deletion(&self) -> Result<String, StorageError> {
        if let Some(stream) = self.inserts.lock().take() {
            let dropped = stream.finish();
            if !dropped.is_empty() {
                warn!(count = dropped.len(), "Discarding insert failures on cleanup");
            }
        }
        *self.mirror.write() = Mirror::default();
        self.store.clean_resources_on_deletion()
    }
}
