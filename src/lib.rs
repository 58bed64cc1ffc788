//! treeindex: hierarchical file-tree index
//!
//! Stores a file hierarchy in a relational table keyed by sharded materialized
//! paths. Provides path resolution, subtree moves, size and etag propagation
//! to ancestors, per-leaf version history and bulk-indexation sessions that
//! buffer writes in memory.

pub mod config;
pub mod consistency;
pub mod error;
pub mod etag;
pub mod events;
pub mod logging;
pub mod mpath;
pub mod resolver;
pub mod service;
pub mod session;
pub mod store;
pub mod tooling;
pub mod types;

pub use error::{ApiError, StorageError};
pub use mpath::MPath;
pub use service::TreeService;
pub use store::{CommitStore, SqlTreeStore, TreeStore};
pub use types::{CommitEntry, NodeType, TreeNode};
