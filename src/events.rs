//! Change notifications emitted after structural mutations.

use crate::types::TreeNode;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Create,
    Update,
    Move,
    Delete,
}

/// One mutation: `source` is the node before, `target` the node after.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeChangeEvent {
    pub kind: EventKind,
    pub source: Option<TreeNode>,
    pub target: Option<TreeNode>,
}

impl NodeChangeEvent {
    pub fn created(node: TreeNode) -> Self {
        Self {
            kind: EventKind::Create,
            source: None,
            target: Some(node),
        }
    }

    pub fn updated(before: TreeNode, after: TreeNode) -> Self {
        Self {
            kind: EventKind::Update,
            source: Some(before),
            target: Some(after),
        }
    }

    pub fn moved(before: TreeNode, after: TreeNode) -> Self {
        Self {
            kind: EventKind::Move,
            source: Some(before),
            target: Some(after),
        }
    }

    pub fn deleted(node: TreeNode) -> Self {
        Self {
            kind: EventKind::Delete,
            source: Some(node),
            target: None,
        }
    }
}

/// Sink for change notifications.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: NodeChangeEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPublisher;

impl EventPublisher for NoopPublisher {
    fn publish(&self, _event: NodeChangeEvent) {}
}

/// Fans events out to every live subscriber.
#[derive(Clone)]
pub struct BroadcastPublisher {
    sender: broadcast::Sender<NodeChangeEvent>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NodeChangeEvent> {
        self.sender.subscribe()
    }
}

impl EventPublisher for BroadcastPublisher {
    fn publish(&self, event: NodeChangeEvent) {
        let kind = event.kind;
        if self.sender.send(event).is_err() {
            debug!(?kind, "No subscribers for change event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_reaches_every_subscriber() {
        let publisher = BroadcastPublisher::new(8);
        let mut rx1 = publisher.subscribe();
        let mut rx2 = publisher.subscribe();

        publisher.publish(NodeChangeEvent::created(TreeNode::collection("a")));

        assert_eq!(rx1.try_recv().unwrap().kind, EventKind::Create);
        assert_eq!(rx2.try_recv().unwrap().kind, EventKind::Create);
    }

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        let publisher = BroadcastPublisher::new(1);
        publisher.publish(NodeChangeEvent::deleted(TreeNode::collection("gone")));
        NoopPublisher.publish(NodeChangeEvent::deleted(TreeNode::collection("gone")));
    }

    #[tokio::test]
    async fn test_async_receive() {
        let publisher = BroadcastPublisher::new(4);
        let mut rx = publisher.subscribe();
        let before = TreeNode::leaf("a", "e1", 1);
        let mut after = before.clone();
        after.etag = "e2".to_string();
        publisher.publish(NodeChangeEvent::updated(before, after));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::Update);
        assert_eq!(event.target.unwrap().etag, "e2");
    }
}
