//! Node Store
//!
//! Durable storage for tree nodes keyed by materialized path, with secondary
//! lookups by identifier and by `(parent, name)`. Capabilities are split: tree
//! operations (`TreeStore`), version history (`CommitStore`) and, for relational
//! backends, connection access (`sql::Connector`).

pub mod batch;
pub mod commits;
pub mod nodes;
pub mod sql;
pub mod stream;

use crate::error::StorageError;
use crate::mpath::{first_available_rank, MPath};
use crate::types::{ChildrenCounts, CommitEntry, TreeNode};

pub use batch::SetNodesBatch;
pub use nodes::SqlTreeStore;
pub use sql::{Connector, SqliteConnector};
pub use stream::{add_node_stream, AddNodeStream};

/// Finite, single-pass sequence of nodes.
pub type NodeStream = std::vec::IntoIter<TreeNode>;

/// Tree operations over a node store.
pub trait TreeStore: Send + Sync {
    /// Insert a node. Fails with `Conflict` if the exact path or the identifier is
    /// already taken, and with `NotFound` if the parent path does not exist.
    fn add_node(&self, node: &TreeNode) -> Result<(), StorageError>;

    /// Upsert a node by exact path.
    fn set_node(&self, node: &TreeNode) -> Result<(), StorageError>;

    /// Apply one etag/size-delta update to every target path of the batch.
    fn set_nodes(&self, batch: &SetNodesBatch) -> Result<usize, StorageError>;

    /// Delete the exact node only. Descendants are the caller's concern.
    fn del_node(&self, node: &TreeNode) -> Result<(), StorageError>;

    fn get_node(&self, path: &MPath) -> Result<TreeNode, StorageError>;

    fn get_node_by_uuid(&self, uuid: &str) -> Result<TreeNode, StorageError>;

    fn get_node_child(&self, parent: &MPath, name: &str) -> Result<TreeNode, StorageError>;

    /// Direct children, ordered by name.
    fn get_node_children(&self, parent: &MPath) -> Result<NodeStream, StorageError>;

    /// Every node strictly below `root` in materialized path order: depth
    /// first, siblings by ascending numeric rank.
    fn get_node_tree(&self, root: &MPath) -> Result<NodeStream, StorageError>;

    /// Re-path `from` and its whole subtree under `to`'s location, replacing
    /// whatever occupies `to`.
    fn move_node_tree(&self, from: &TreeNode, to: &TreeNode) -> Result<(), StorageError>;

    /// Make buffered writes durable. Stores without buffering return immediately.
    fn flush(&self, final_flush: bool) -> Result<(), StorageError>;

    /// Drop every resource backing the index. Returns a human readable summary.
    fn clean_resources_on_deletion(&self) -> Result<String, StorageError>;

    /// Child holding the highest sibling rank.
    fn get_node_last_child(&self, parent: &MPath) -> Result<TreeNode, StorageError> {
        self.get_node_children(parent)?
            .max_by_key(|n| n.mpath.rank())
            .ok_or_else(|| StorageError::NotFound(format!("no children under {}", parent)))
    }

    /// Rank a new child of `parent` should take, reusing freed slots first.
    fn get_node_first_available_child_index(&self, parent: &MPath) -> Result<u64, StorageError> {
        let ranks: Vec<u64> = self.get_node_children(parent)?.map(|n| n.mpath.rank()).collect();
        Ok(first_available_rank(&ranks))
    }

    fn get_node_children_count(&self, parent: &MPath) -> Result<usize, StorageError> {
        Ok(self.get_node_children(parent)?.len())
    }

    /// Collections strictly below `root` whose etag is the dirty sentinel.
    fn get_dirty_collections(&self, root: &MPath) -> Result<NodeStream, StorageError> {
        let dirty: Vec<TreeNode> = self
            .get_node_tree(root)?
            .filter(|n| n.is_collection() && n.is_dirty())
            .collect();
        Ok(dirty.into_iter())
    }

    fn get_node_children_counts(&self, parent: &MPath) -> Result<ChildrenCounts, StorageError> {
        let mut counts = ChildrenCounts::default();
        for child in self.get_node_children(parent)? {
            if child.is_leaf() {
                counts.leaves += 1;
            } else {
                counts.collections += 1;
            }
        }
        Ok(counts)
    }
}

/// Append-only per-leaf version history.
pub trait CommitStore: Send + Sync {
    fn push_commit(&self, node: &TreeNode) -> Result<(), StorageError>;

    /// Most recent first. `NotFound` when the node has no history.
    fn list_commits(&self, node: &TreeNode) -> Result<Vec<CommitEntry>, StorageError>;

    fn delete_commits(&self, node: &TreeNode) -> Result<(), StorageError>;
}

/// True when a leaf update should be recorded in its history: the etag changed
/// and neither the old nor the new value is a placeholder.
pub fn should_push_commit(previous_etag: Option<&str>, node: &TreeNode) -> bool {
    use crate::types::{DIRTY_ETAG, UPLOADING_ETAG};

    if !node.is_leaf() || node.etag.is_empty() {
        return false;
    }
    if node.etag == UPLOADING_ETAG || node.etag == DIRTY_ETAG {
        return false;
    }
    previous_etag != Some(node.etag.as_str())
}
