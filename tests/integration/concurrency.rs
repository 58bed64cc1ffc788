use crate::{read, service};
use std::collections::HashSet;
use treeindex::service::{CreateNodeRequest, ListNodesRequest};
use treeindex::{ApiError, TreeNode};

#[test]
fn concurrent_sibling_creates_get_distinct_paths() {
    let service = service();
    service
        .create_node(CreateNodeRequest::new("/shared", TreeNode::collection("")))
        .unwrap();

    std::thread::scope(|scope| {
        for t in 0..8 {
            let service = &service;
            scope.spawn(move || {
                for i in 0..10 {
                    let path = format!("/shared/t{}-{}", t, i);
                    loop {
                        match service.create_node(CreateNodeRequest::new(
                            path.clone(),
                            TreeNode::leaf("", "e", 1),
                        )) {
                            Ok(_) => break,
                            Err(ApiError::Conflict(_)) => continue,
                            Err(e) => panic!("unexpected error: {}", e),
                        }
                    }
                }
            });
        }
    });

    let children = service
        .list_nodes(ListNodesRequest {
            path: "/shared".to_string(),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(children.len(), 80);
    let paths: HashSet<_> = children.iter().map(|n| n.mpath.clone()).collect();
    assert_eq!(paths.len(), 80);
    let names: HashSet<_> = children.iter().map(|n| n.name.clone()).collect();
    assert_eq!(names.len(), 80);
    assert_eq!(read(&service, "/shared").size, 80);
}

#[test]
fn concurrent_creates_in_same_collection_take_consecutive_ranks() {
    let service = service();
    service
        .create_node(CreateNodeRequest::new("/a/b", TreeNode::collection("")))
        .unwrap();
    let b = read(&service, "/a/b");

    std::thread::scope(|scope| {
        for name in ["x", "y"] {
            let service = &service;
            scope.spawn(move || {
                let path = format!("/a/b/{}", name);
                loop {
                    match service.create_node(CreateNodeRequest::new(
                        path.clone(),
                        TreeNode::leaf("", name, 1),
                    )) {
                        Ok(_) => break,
                        Err(ApiError::Conflict(_)) => continue,
                        Err(e) => panic!("unexpected error: {}", e),
                    }
                }
            });
        }
    });

    let x = read(&service, "/a/b/x");
    let y = read(&service, "/a/b/y");
    let ranks: HashSet<u64> = [x.mpath.rank(), y.mpath.rank()]
        .into_iter()
        .collect();
    assert_eq!(ranks, HashSet::from([1, 2]));
    assert_eq!(x.mpath.parent(), Some(b.mpath.clone()));
    assert_eq!(y.mpath.parent(), Some(b.mpath));
}
