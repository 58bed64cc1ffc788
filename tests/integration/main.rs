//! Integration tests for the tree index

mod cli_contract;
mod concurrency;
mod etag_propagation;
mod session_equivalence;
mod tree_operations;

use treeindex::config::IndexConfig;
use treeindex::service::{CreateNodeRequest, NodeRef, ReadNodeRequest, TreeService};
use treeindex::TreeNode;

pub fn service() -> TreeService {
    TreeService::in_memory(&IndexConfig::default()).unwrap()
}

pub fn put(service: &TreeService, path: &str, etag: &str, size: i64) -> TreeNode {
    service
        .create_node(CreateNodeRequest::new(path, TreeNode::leaf("", etag, size)))
        .unwrap()
}

pub fn read(service: &TreeService, path: &str) -> TreeNode {
    service
        .read_node(ReadNodeRequest {
            node: NodeRef::path(path),
            ..Default::default()
        })
        .unwrap()
        .node
}
