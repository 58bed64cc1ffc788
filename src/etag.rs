//! Fingerprint Propagator
//!
//! A collection's etag is the digest of its direct children's etags, children
//! ordered by name. Writers mark ancestors dirty and resync recomputes only the
//! dirty collections, bottom-up, persisting only values that changed.

use crate::error::StorageError;
use crate::mpath::MPath;
use crate::store::{SetNodesBatch, TreeStore};
use crate::types::{TreeNode, DIRTY_ETAG};
use tracing::{debug, info};

/// Etag of a collection holding `children`.
pub fn collection_etag<'a, I>(children: I) -> String
where
    I: IntoIterator<Item = &'a TreeNode>,
{
    let mut sorted: Vec<&TreeNode> = children.into_iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));

    let mut hasher = blake3::Hasher::new();
    for (i, child) in sorted.iter().enumerate() {
        if i > 0 {
            hasher.update(b".");
        }
        hasher.update(child.etag.as_bytes());
    }
    hex::encode(hasher.finalize().as_bytes())
}

/// Set the node's stored etag to the dirty sentinel.
pub fn mark_dirty(store: &dyn TreeStore, node: &TreeNode) -> Result<(), StorageError> {
    if node.is_dirty() {
        return Ok(());
    }
    let mut dirty = node.clone();
    dirty.etag = DIRTY_ETAG.to_string();
    store.set_node(&dirty)
}

/// Mark every ancestor of `path` dirty and shift their sizes by `size_delta`.
pub fn mark_ancestors_dirty(
    store: &dyn TreeStore,
    path: &MPath,
    size_delta: i64,
) -> Result<usize, StorageError> {
    let mut batch = SetNodesBatch::new(Some(DIRTY_ETAG), size_delta);
    batch.extend(path.ancestors());
    batch.close(store)
}

/// Recompute dirty collection etags under (and including) `root`.
///
/// Only collections holding the dirty sentinel are recomputed, deepest first,
/// each from its direct children. A change then climbs through clean ancestors
/// until a recomputed value matches the stored one or `root` is reached; dirty
/// ancestors are left to their own turn. Returns the number of nodes whose etag
/// changed.
pub fn resync_dirty_etags(store: &dyn TreeStore, root: &TreeNode) -> Result<usize, StorageError> {
    if root.is_leaf() {
        return Ok(0);
    }

    let mut dirty: Vec<MPath> = store
        .get_dirty_collections(&root.mpath)?
        .map(|n| n.mpath)
        .collect();
    if root.is_dirty() {
        dirty.push(root.mpath.clone());
    }
    dirty.sort_by(|a, b| b.level().cmp(&a.level()).then_with(|| a.cmp(b)));

    let mut changed = 0;
    for path in &dirty {
        let node = store.get_node(path)?;
        if !refresh(store, node)? {
            continue;
        }
        changed += 1;

        for ancestor in path.ancestors() {
            if ancestor != root.mpath && !ancestor.is_descendant_of(&root.mpath) {
                break;
            }
            let node = store.get_node(&ancestor)?;
            if node.is_dirty() || !refresh(store, node)? {
                break;
            }
            changed += 1;
        }
    }

    info!(root = %root.mpath, dirty = dirty.len(), changed, "Resynced dirty etags");
    Ok(changed)
}

/// Recompute one collection from its children; persist and report a change.
fn refresh(store: &dyn TreeStore, mut node: TreeNode) -> Result<bool, StorageError> {
    let children: Vec<TreeNode> = store.get_node_children(&node.mpath)?.collect();
    let etag = collection_etag(&children);
    if node.etag == etag {
        return Ok(false);
    }
    debug!(mpath = %node.mpath, old = %node.etag, new = %etag, "Recomputed collection etag");
    node.etag = etag;
    store.set_node(&node)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::resolver::PathResolver;
    use crate::store::{SqlTreeStore, SqliteConnector};
    use std::sync::Arc;

    fn store() -> SqlTreeStore {
        let db = Arc::new(SqliteConnector::open_in_memory(&StorageConfig::default()).unwrap());
        SqlTreeStore::new(db).unwrap()
    }

    fn put(store: &SqlTreeStore, path: &str, etag: &str) -> TreeNode {
        let res = PathResolver::new(store)
            .resolve(path, true, Some(TreeNode::leaf("", etag, 1)))
            .unwrap();
        store.get_node(&res.mpath).unwrap()
    }

    fn at(store: &SqlTreeStore, path: &str) -> TreeNode {
        let res = PathResolver::new(store).resolve(path, false, None).unwrap();
        store.get_node(&res.mpath).unwrap()
    }

    #[test]
    fn test_collection_etag_is_order_stable() {
        let mut a = TreeNode::leaf("a", "ea", 1);
        let mut b = TreeNode::leaf("b", "eb", 1);
        let forward = collection_etag([&a, &b]);
        let backward = collection_etag([&b, &a]);
        assert_eq!(forward, backward);

        a.etag = "ea2".to_string();
        let changed = collection_etag([&a, &b]);
        assert_ne!(changed, forward);

        // renaming reorders the children and therefore the digest input
        b.name = "0".to_string();
        assert_ne!(collection_etag([&a, &b]), changed);
    }

    #[test]
    fn test_resync_matches_manual_digest() {
        let store = store();
        put(&store, "/p/a", "ea");
        put(&store, "/p/b", "eb");
        put(&store, "/p/sub/x", "ex");

        let parent = at(&store, "/p");
        resync_dirty_etags(&store, &parent).unwrap();

        let sub = at(&store, "/p/sub");
        let x = at(&store, "/p/sub/x");
        assert_eq!(sub.etag, collection_etag([&x]));

        let a = at(&store, "/p/a");
        let b = at(&store, "/p/b");
        assert_eq!(at(&store, "/p").etag, collection_etag([&a, &b, &sub]));
    }

    #[test]
    fn test_leaf_change_propagates_to_root_only() {
        let store = store();
        let x = put(&store, "/p/q/x", "ex");
        put(&store, "/p/sibling/y", "ey");
        let root = store.get_node(&MPath::root()).unwrap();
        resync_dirty_etags(&store, &root).unwrap();

        let before_q = at(&store, "/p/q").etag;
        let before_p = at(&store, "/p").etag;
        let before_root = store.get_node(&MPath::root()).unwrap().etag;
        let before_sibling = at(&store, "/p/sibling").etag;

        let mut changed = x.clone();
        changed.etag = "ex2".to_string();
        store.set_node(&changed).unwrap();
        mark_ancestors_dirty(&store, &changed.mpath, 0).unwrap();
        let root = store.get_node(&MPath::root()).unwrap();
        assert!(root.is_dirty());
        assert_eq!(resync_dirty_etags(&store, &root).unwrap(), 3);

        assert_ne!(at(&store, "/p/q").etag, before_q);
        assert_ne!(at(&store, "/p").etag, before_p);
        assert_ne!(store.get_node(&MPath::root()).unwrap().etag, before_root);
        assert_eq!(at(&store, "/p/sibling").etag, before_sibling);
    }

    #[test]
    fn test_resync_leaves_clean_branches_alone() {
        let store = store();
        put(&store, "/left/x", "ex");
        put(&store, "/right/y", "ey");
        let root = store.get_node(&MPath::root()).unwrap();
        resync_dirty_etags(&store, &root).unwrap();

        // a clean collection is trusted as stored, even with a stale value
        let mut right = at(&store, "/right");
        right.etag = "stale".to_string();
        store.set_node(&right).unwrap();

        let x2 = {
            let mut x = at(&store, "/left/x");
            x.etag = "ex2".to_string();
            store.set_node(&x).unwrap();
            mark_ancestors_dirty(&store, &x.mpath, 0).unwrap();
            x
        };
        let root = store.get_node(&MPath::root()).unwrap();
        assert_eq!(resync_dirty_etags(&store, &root).unwrap(), 2);

        assert_eq!(at(&store, "/right").etag, "stale");
        assert_eq!(at(&store, "/left").etag, collection_etag([&x2]));
        let left = at(&store, "/left");
        let right = at(&store, "/right");
        assert_eq!(
            store.get_node(&MPath::root()).unwrap().etag,
            collection_etag([&left, &right])
        );
    }

    #[test]
    fn test_change_climbs_through_clean_ancestors() {
        let store = store();
        put(&store, "/a/b/f", "ef");
        let root = store.get_node(&MPath::root()).unwrap();
        resync_dirty_etags(&store, &root).unwrap();
        let before_root = store.get_node(&MPath::root()).unwrap().etag;

        // only the deepest collection is flagged; its ancestors are still clean
        let mut f = at(&store, "/a/b/f");
        f.etag = "ef2".to_string();
        store.set_node(&f).unwrap();
        mark_dirty(&store, &at(&store, "/a/b")).unwrap();

        let root = store.get_node(&MPath::root()).unwrap();
        assert_eq!(resync_dirty_etags(&store, &root).unwrap(), 3);
        assert_ne!(store.get_node(&MPath::root()).unwrap().etag, before_root);

        // nothing dirty left: a second pass changes nothing
        let root = store.get_node(&MPath::root()).unwrap();
        assert_eq!(resync_dirty_etags(&store, &root).unwrap(), 0);
    }

    #[test]
    fn test_mark_dirty_sets_sentinel() {
        let store = store();
        put(&store, "/d/f", "e");
        let root = store.get_node(&MPath::root()).unwrap();
        resync_dirty_etags(&store, &root).unwrap();
        let d = at(&store, "/d");
        assert!(!d.is_dirty());
        mark_dirty(&store, &d).unwrap();
        assert!(at(&store, "/d").is_dirty());
    }
}
