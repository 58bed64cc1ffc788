//! Core types for the tree index.

use crate::mpath::MPath;
use serde::{Deserialize, Serialize};

/// Identifier of the root node.
pub const ROOT_UUID: &str = "ROOT";

/// Etag of a collection whose fingerprint has not been recomputed yet.
pub const DIRTY_ETAG: &str = "-1";

/// Etag of a leaf whose content is still being uploaded.
pub const UPLOADING_ETAG: &str = "temporary";

/// Node type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeType {
    Leaf,
    Collection,
}

/// A node of the indexed hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeNode {
    pub uuid: String,
    pub mpath: MPath,
    pub name: String,
    pub node_type: NodeType,
    pub etag: String,
    /// Content size for leaves, sum of descendant leaf sizes for collections.
    pub size: i64,
    /// Unix timestamp, seconds.
    pub mtime: i64,
    #[serde(default)]
    pub mode: i32,
}

impl TreeNode {
    /// A new leaf with a fresh identifier, not yet placed in the tree.
    pub fn leaf(name: impl Into<String>, etag: impl Into<String>, size: i64) -> Self {
        Self {
            uuid: new_uuid(),
            mpath: MPath::root(),
            name: name.into(),
            node_type: NodeType::Leaf,
            etag: etag.into(),
            size,
            mtime: now(),
            mode: 0o644,
        }
    }

    /// A new collection with a dirty etag, not yet placed in the tree.
    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            uuid: new_uuid(),
            mpath: MPath::root(),
            name: name.into(),
            node_type: NodeType::Collection,
            etag: DIRTY_ETAG.to_string(),
            size: 0,
            mtime: now(),
            mode: 0o755,
        }
    }

    pub fn root() -> Self {
        Self {
            uuid: ROOT_UUID.to_string(),
            mpath: MPath::root(),
            name: String::new(),
            node_type: NodeType::Collection,
            etag: DIRTY_ETAG.to_string(),
            size: 0,
            mtime: now(),
            mode: 0o755,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.node_type == NodeType::Leaf
    }

    pub fn is_collection(&self) -> bool {
        self.node_type == NodeType::Collection
    }

    pub fn level(&self) -> usize {
        self.mpath.level()
    }

    pub fn is_dirty(&self) -> bool {
        self.etag == DIRTY_ETAG
    }

    /// Assign an identifier if the caller left it empty.
    pub fn ensure_uuid(&mut self) {
        if self.uuid.is_empty() {
            self.uuid = new_uuid();
        }
    }
}

/// One entry of a leaf's version history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitEntry {
    /// Version identifier, the leaf etag at commit time.
    pub uuid: String,
    pub etag: String,
    pub mtime: i64,
    pub size: i64,
}

impl CommitEntry {
    pub fn from_node(node: &TreeNode) -> Self {
        Self {
            uuid: node.etag.clone(),
            etag: node.etag.clone(),
            mtime: node.mtime,
            size: node.size,
        }
    }
}

/// Direct children counts split by type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildrenCounts {
    pub collections: usize,
    pub leaves: usize,
}

pub fn new_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}
