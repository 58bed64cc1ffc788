use crate::{read, service};
use treeindex::events::{BroadcastPublisher, EventKind};
use treeindex::service::{CreateNodeRequest, ListNodesRequest, TreeService};
use treeindex::config::IndexConfig;
use treeindex::TreeNode;
use std::sync::Arc;

fn snapshot(service: &TreeService, session: Option<&str>) -> Vec<(String, String, String, bool)> {
    let mut nodes: Vec<_> = service
        .list_nodes(ListNodesRequest {
            path: "/".to_string(),
            recursive: true,
            session: session.map(str::to_string),
            ..Default::default()
        })
        .unwrap()
        .into_iter()
        .map(|n| (n.uuid.clone(), n.mpath.to_string(), n.name.clone(), n.is_leaf()))
        .collect();
    nodes.sort();
    nodes
}

#[test]
fn session_view_matches_store_after_close() {
    let service = service();
    service.open_session("bulk").unwrap();
    for dir in 0..3 {
        for file in 0..10 {
            service
                .create_node(
                    CreateNodeRequest::new(
                        format!("/d{}/f{}", dir, file),
                        TreeNode::leaf("", format!("e{}-{}", dir, file), 2),
                    )
                    .in_session("bulk"),
                )
                .unwrap();
        }
    }

    let in_session = snapshot(&service, Some("bulk"));
    assert_eq!(in_session.len(), 33);

    service.close_session("bulk").unwrap();
    assert!(service.sessions().get("bulk").is_none());
    assert_eq!(snapshot(&service, None), in_session);
    assert_eq!(read(&service, "/").size, 60);
    assert_eq!(read(&service, "/d1").size, 20);
}

#[test]
fn session_events_published_on_flush() {
    let publisher = Arc::new(BroadcastPublisher::new(64));
    let mut events = publisher.subscribe();
    let config = IndexConfig::default();
    let base = TreeService::in_memory(&config).unwrap();
    let service = TreeService::new(Arc::clone(base.store()), publisher, config.session.clone());

    service
        .create_node(CreateNodeRequest::new("/x/y", TreeNode::leaf("", "e", 4)).in_session("s"))
        .unwrap();
    assert!(events.try_recv().is_err());

    service.flush_session("s").unwrap();
    let mut kinds = Vec::new();
    while let Ok(event) = events.try_recv() {
        kinds.push(event.kind);
    }
    assert_eq!(kinds, vec![EventKind::Create, EventKind::Create]);
    assert_eq!(read(&service, "/x").size, 4);
    service.close_session("s").unwrap();
}
