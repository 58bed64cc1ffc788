//! Asynchronous insert stream.
//!
//! Nodes sent on the stream are inserted, in send order, by one dedicated worker
//! thread. Insert failures are collected rather than returned to the sender.
//! `finish` closes the stream, joins the worker and hands back every failure.

use super::TreeStore;
use crate::error::StorageError;
use crate::types::TreeNode;
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Producer side of a running insert worker.
pub struct AddNodeStream {
    nodes: Option<mpsc::Sender<TreeNode>>,
    errors: mpsc::UnboundedReceiver<StorageError>,
    worker: Option<JoinHandle<usize>>,
}

/// Start an insert worker over `store` with a queue of `buffer` pending nodes.
///
/// Sending blocks while the queue is full. The stream is synchronous and must not
/// be driven from inside an async runtime.
pub fn add_node_stream(
    store: Arc<dyn TreeStore>,
    buffer: usize,
) -> Result<AddNodeStream, StorageError> {
    let (node_tx, mut node_rx) = mpsc::channel::<TreeNode>(buffer.max(1));
    let (err_tx, err_rx) = mpsc::unbounded_channel();

    let worker = std::thread::Builder::new()
        .name("treeindex-insert".to_string())
        .spawn(move || {
            let mut inserted = 0usize;
            while let Some(node) = node_rx.blocking_recv() {
                match store.add_node(&node) {
                    Ok(()) => inserted += 1,
                    Err(e) => {
                        warn!(uuid = %node.uuid, mpath = %node.mpath, error = %e, "Queued insert failed");
                        let _ = err_tx.send(e);
                    }
                }
            }
            inserted
        })?;

    Ok(AddNodeStream {
        nodes: Some(node_tx),
        errors: err_rx,
        worker: Some(worker),
    })
}

impl AddNodeStream {
    /// Queue one node for insertion.
    pub fn send(&self, node: TreeNode) -> Result<(), StorageError> {
        let sender = self
            .nodes
            .as_ref()
            .ok_or_else(|| StorageError::Internal("insert stream already closed".to_string()))?;
        sender
            .blocking_send(node)
            .map_err(|_| StorageError::Internal("insert worker stopped".to_string()))
    }

    /// Close the stream, wait for the worker to drain it and return the failures.
    pub fn finish(mut self) -> Vec<StorageError> {
        self.close()
    }

    fn close(&mut self) -> Vec<StorageError> {
        drop(self.nodes.take());
        let mut failures = Vec::new();
        if let Some(worker) = self.worker.take() {
            match worker.join() {
                Ok(inserted) => debug!(inserted, "Insert worker drained"),
                Err(_) => failures.push(StorageError::Internal(
                    "insert worker panicked".to_string(),
                )),
            }
        }
        while let Ok(e) = self.errors.try_recv() {
            failures.push(e);
        }
        failures
    }
}

impl Drop for AddNodeStream {
    fn drop(&mut self) {
        let failures = self.close();
        if !failures.is_empty() {
            warn!(count = failures.len(), "Insert stream dropped with unreported failures");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::mpath::MPath;
    use crate::store::{SqlTreeStore, SqliteConnector};

    #[test]
    fn test_stream_inserts_in_order_and_collects_failures() {
        let db = Arc::new(SqliteConnector::open_in_memory(&StorageConfig::default()).unwrap());
        let store: Arc<dyn TreeStore> = Arc::new(SqlTreeStore::new(db).unwrap());
        let stream = add_node_stream(Arc::clone(&store), 2).unwrap();

        let mut parent = TreeNode::collection("p");
        parent.mpath = MPath::new(vec![1, 1]).unwrap();
        let mut child = TreeNode::leaf("c", "e", 1);
        child.mpath = MPath::new(vec![1, 1, 1]).unwrap();
        let mut duplicate = TreeNode::leaf("dup", "e", 1);
        duplicate.mpath = child.mpath.clone();

        stream.send(parent).unwrap();
        stream.send(child).unwrap();
        stream.send(duplicate).unwrap();
        let failures = stream.finish();

        assert_eq!(failures.len(), 1);
        assert!(failures[0].is_conflict());
        assert_eq!(store.get_node_tree(&MPath::root()).unwrap().count(), 2);
    }
}
