use crate::{put, read, service};
use treeindex::service::{
    CreateNodeRequest, DeleteNodeRequest, ListNodesRequest, NodeRef, UpdateNodeRequest,
};
use treeindex::{MPath, NodeType, TreeNode};

#[test]
fn create_deep_path_creates_collection_ancestors() {
    let service = service();
    let c = put(&service, "/a/b/c", "etag-c", 7);

    assert_eq!(read(&service, "/a").node_type, NodeType::Collection);
    assert_eq!(read(&service, "/a/b").node_type, NodeType::Collection);
    assert_eq!(c.node_type, NodeType::Leaf);
    assert_eq!(c.mpath, MPath::decode("1.1.1.1").unwrap());

    let back = read(&service, "/a/b/c");
    assert_eq!(back.uuid, c.uuid);
    assert_eq!(back.etag, "etag-c");
    assert_eq!(read(&service, "/a").size, 7);
    assert_eq!(read(&service, "/").size, 7);
}

#[test]
fn read_by_uuid_matches_read_by_path() {
    let service = service();
    let leaf = put(&service, "/docs/readme.md", "r1", 12);
    let by_uuid = service
        .read_node(treeindex::service::ReadNodeRequest {
            node: NodeRef::uuid(leaf.uuid.clone()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(by_uuid.path, "/docs/readme.md");
    assert_eq!(by_uuid.node, read(&service, "/docs/readme.md"));
}

#[test]
fn freed_slot_is_reused() {
    let service = service();
    put(&service, "/d/a", "1", 1);
    put(&service, "/d/b", "2", 1);
    put(&service, "/d/c", "3", 1);
    let d = read(&service, "/d");

    service
        .delete_node(DeleteNodeRequest {
            node: NodeRef::path("/d/b"),
            session: None,
        })
        .unwrap();
    let z = put(&service, "/d/z", "4", 1);
    assert_eq!(z.mpath, d.mpath.child(2));
    assert_eq!(read(&service, "/d").size, 3);
}

#[test]
fn move_preserves_subtree_and_history() {
    let service = service();
    put(&service, "/src/x/f.txt", "v1", 4);
    service
        .create_node(
            CreateNodeRequest::new("/src/x/f.txt", TreeNode::leaf("", "v2", 6)).update_if_exists(),
        )
        .unwrap();
    put(&service, "/src/y.txt", "y", 1);
    put(&service, "/dst/keep.txt", "k", 2);

    let moved = service
        .update_node(UpdateNodeRequest {
            from: NodeRef::path("/src"),
            to: "/dst/moved".to_string(),
            session: None,
        })
        .unwrap();
    assert_eq!(moved.name, "moved");

    let names: Vec<String> = service
        .list_nodes(ListNodesRequest {
            path: "/dst/moved".to_string(),
            recursive: true,
            ..Default::default()
        })
        .unwrap()
        .into_iter()
        .map(|n| n.name)
        .collect();
    assert_eq!(names.len(), 3);
    assert!(names.contains(&"x".to_string()));
    assert!(names.contains(&"f.txt".to_string()));
    assert!(names.contains(&"y.txt".to_string()));

    let commits = service.list_commits("/dst/moved/x/f.txt").unwrap();
    assert_eq!(commits.len(), 2);
    assert_eq!(commits[0].etag, "v2");

    assert_eq!(read(&service, "/dst").size, 9);
    assert_eq!(read(&service, "/").size, 9);
    assert!(service
        .read_node(treeindex::service::ReadNodeRequest {
            node: NodeRef::path("/src"),
            ..Default::default()
        })
        .is_err());
}

#[test]
fn delete_removes_subtree_and_sizes() {
    let service = service();
    put(&service, "/p/q/r.bin", "r", 100);
    put(&service, "/p/s.bin", "s", 5);
    let removed = service
        .delete_node(DeleteNodeRequest {
            node: NodeRef::path("/p/q"),
            session: None,
        })
        .unwrap();
    assert_eq!(removed, 2);
    assert_eq!(read(&service, "/p").size, 5);
    assert_eq!(
        service
            .list_nodes(ListNodesRequest {
                path: "/".to_string(),
                recursive: true,
                ..Default::default()
            })
            .unwrap()
            .len(),
        2
    );
}
