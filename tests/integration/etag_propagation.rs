use crate::{put, read, service};
use treeindex::etag::collection_etag;
use treeindex::service::{CreateNodeRequest, NodeRef, ReadNodeRequest};
use treeindex::types::DIRTY_ETAG;
use treeindex::TreeNode;

fn read_with_etags(service: &treeindex::TreeService, path: &str) -> TreeNode {
    service
        .read_node(ReadNodeRequest {
            node: NodeRef::path(path),
            with_etags: true,
            ..Default::default()
        })
        .unwrap()
        .node
}

#[test]
fn leaf_change_dirties_every_ancestor() {
    let service = service();
    put(&service, "/a/b/f1", "e1", 1);
    put(&service, "/a/b/f2", "e2", 1);
    put(&service, "/a/other", "o", 1);
    read_with_etags(&service, "/");

    service
        .create_node(CreateNodeRequest::new("/a/b/f1", TreeNode::leaf("", "e1-new", 3)).update_if_exists())
        .unwrap();

    assert_eq!(read(&service, "/a/b").etag, DIRTY_ETAG);
    assert_eq!(read(&service, "/a").etag, DIRTY_ETAG);
    assert_eq!(read(&service, "/").etag, DIRTY_ETAG);
    assert_eq!(read(&service, "/a/other").etag, "o");
    assert_eq!(read(&service, "/").size, 5);
}

#[test]
fn recomputed_etags_follow_children() {
    let service = service();
    put(&service, "/a/b/f1", "e1", 1);
    put(&service, "/a/b/f2", "e2", 1);
    put(&service, "/a/z", "ez", 1);

    let a = read_with_etags(&service, "/a");
    let b = read(&service, "/a/b");
    let f1 = read(&service, "/a/b/f1");
    let f2 = read(&service, "/a/b/f2");
    let z = read(&service, "/a/z");

    assert_eq!(b.etag, collection_etag([&f2, &f1]));
    assert_eq!(a.etag, collection_etag([&b, &z]));

    // identical content gives an identical fingerprint
    service
        .create_node(CreateNodeRequest::new("/a/b/f1", TreeNode::leaf("", "changed", 1)).update_if_exists())
        .unwrap();
    let changed = read_with_etags(&service, "/a");
    assert_ne!(changed.etag, a.etag);
    service
        .create_node(CreateNodeRequest::new("/a/b/f1", TreeNode::leaf("", "e1", 1)).update_if_exists())
        .unwrap();
    assert_eq!(read_with_etags(&service, "/a").etag, a.etag);
}
