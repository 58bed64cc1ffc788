//! Path Resolver
//!
//! Maps `/`-separated name paths onto materialized paths, creating missing
//! intermediate collections on demand. New children take the first free sibling
//! rank of their parent.
//!
//! Resolution never retries: losing a race against a concurrent writer surfaces as
//! `Conflict`, and the caller re-resolves to observe the winner.

use crate::error::StorageError;
use crate::mpath::MPath;
use crate::store::TreeStore;
use crate::types::TreeNode;
use tracing::debug;
use unicode_normalization::UnicodeNormalization;

/// Outcome of a resolution.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub mpath: MPath,
    /// Nodes inserted while resolving, outermost first. Empty when the path
    /// already existed.
    pub created: Vec<TreeNode>,
}

/// Split a string path into normalized segments.
///
/// Empty and `.` segments are dropped, `..` is rejected. Segments are NFC
/// normalized so that visually identical names compare equal.
pub fn split_path(path: &str) -> Result<Vec<String>, StorageError> {
    let mut segments = Vec::new();
    for raw in path.split('/') {
        match raw {
            "" | "." => continue,
            ".." => {
                return Err(StorageError::InvalidArgument(format!(
                    "parent references are not allowed in {:?}",
                    path
                )))
            }
            name => segments.push(name.nfc().collect::<String>()),
        }
    }
    Ok(segments)
}

pub struct PathResolver<'a> {
    store: &'a dyn TreeStore,
}

impl<'a> PathResolver<'a> {
    pub fn new(store: &'a dyn TreeStore) -> Self {
        Self { store }
    }

    /// Resolve `path` to a materialized path.
    ///
    /// With `create` unset every segment must exist. With `create` set the
    /// missing tail is inserted as collections, except the final segment which
    /// takes `seed` when one is given. The seed's name and location are
    /// overwritten; its identifier is kept unless empty.
    pub fn resolve(
        &self,
        path: &str,
        create: bool,
        seed: Option<TreeNode>,
    ) -> Result<Resolution, StorageError> {
        let segments = split_path(path)?;
        let mut current = MPath::root();
        let mut depth = 0;

        while depth < segments.len() {
            match self.store.get_node_child(&current, &segments[depth]) {
                Ok(child) => {
                    if child.is_leaf() && depth + 1 < segments.len() {
                        return Err(StorageError::InvalidArgument(format!(
                            "{:?} is not a collection",
                            segments[..=depth].join("/")
                        )));
                    }
                    current = child.mpath;
                    depth += 1;
                }
                Err(e) if e.is_not_found() => break,
                Err(e) => return Err(e),
            }
        }

        if depth == segments.len() {
            return Ok(Resolution {
                mpath: current,
                created: Vec::new(),
            });
        }
        if !create {
            return Err(StorageError::NotFound(format!(
                "{:?} does not exist under {:?}",
                segments[depth],
                segments[..depth].join("/")
            )));
        }

        let mut created = Vec::with_capacity(segments.len() - depth);
        let mut seed = seed;
        for (i, name) in segments.iter().enumerate().skip(depth) {
            let last = i + 1 == segments.len();
            let mut node = if last {
                seed.take()
                    .unwrap_or_else(|| TreeNode::collection(name.clone()))
            } else {
                TreeNode::collection(name.clone())
            };
            node.name = name.clone();
            node.ensure_uuid();
            let rank = self.store.get_node_first_available_child_index(&current)?;
            node.mpath = current.child(rank);
            self.store.add_node(&node)?;
            debug!(mpath = %node.mpath, name = %node.name, "Created node during resolution");
            current = node.mpath.clone();
            created.push(node);
        }

        Ok(Resolution {
            mpath: current,
            created,
        })
    }

    /// Name path of a stored node, `/`-separated and rooted.
    pub fn name_path(&self, node: &TreeNode) -> Result<String, StorageError> {
        let mut names = Vec::with_capacity(node.level());
        for ancestor in node.mpath.ancestors().iter().rev().skip(1) {
            names.push(self.store.get_node(ancestor)?.name);
        }
        if !node.mpath.is_root() {
            names.push(node.name.clone());
        }
        Ok(format!("/{}", names.join("/")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::store::{SqlTreeStore, SqliteConnector};
    use std::sync::Arc;

    fn store() -> SqlTreeStore {
        let db = Arc::new(SqliteConnector::open_in_memory(&StorageConfig::default()).unwrap());
        SqlTreeStore::new(db).unwrap()
    }

    #[test]
    fn test_split_path_normalizes() {
        assert_eq!(split_path("/a//./b/").unwrap(), vec!["a", "b"]);
        assert!(split_path("/a/../b").is_err());
        // "e" followed by a combining acute accent composes to U+00E9
        assert_eq!(split_path("/cafe\u{301}").unwrap(), vec!["caf\u{e9}"]);
        assert!(split_path("/").unwrap().is_empty());
    }

    #[test]
    fn test_resolve_creates_missing_ancestors() {
        let store = store();
        let resolver = PathResolver::new(&store);
        let seed = TreeNode::leaf("ignored", "etag-c", 12);
        let res = resolver.resolve("/a/b/c", true, Some(seed)).unwrap();

        assert_eq!(res.mpath.encode(), "1.1.1.1");
        let names: Vec<&str> = res.created.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert!(res.created[0].is_collection());
        assert!(res.created[2].is_leaf());
        assert_eq!(store.get_node(&res.mpath).unwrap().etag, "etag-c");

        let again = resolver.resolve("/a/b/c", false, None).unwrap();
        assert_eq!(again.mpath, res.mpath);
        assert!(again.created.is_empty());
    }

    #[test]
    fn test_resolve_without_create_reports_not_found() {
        let store = store();
        let resolver = PathResolver::new(&store);
        resolver.resolve("/a", true, None).unwrap();
        let err = resolver.resolve("/a/missing/x", false, None).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_resolve_through_leaf_is_rejected() {
        let store = store();
        let resolver = PathResolver::new(&store);
        resolver
            .resolve("/f.txt", true, Some(TreeNode::leaf("f.txt", "e", 1)))
            .unwrap();
        assert!(matches!(
            resolver.resolve("/f.txt/x", true, None),
            Err(StorageError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_new_child_reuses_freed_rank() {
        let store = store();
        let resolver = PathResolver::new(&store);
        for name in ["a", "b", "c"] {
            resolver.resolve(&format!("/{}", name), true, None).unwrap();
        }
        let b = store.get_node_child(&MPath::root(), "b").unwrap();
        store.del_node(&b).unwrap();

        let d = resolver.resolve("/d", true, None).unwrap();
        assert_eq!(d.mpath.rank(), 2);
        let e = resolver.resolve("/e", true, None).unwrap();
        assert_eq!(e.mpath.rank(), 4);
    }

    #[test]
    fn test_name_path_round_trip() {
        let store = store();
        let resolver = PathResolver::new(&store);
        let res = resolver.resolve("/docs/2024/report.pdf", true, None).unwrap();
        let node = store.get_node(&res.mpath).unwrap();
        assert_eq!(resolver.name_path(&node).unwrap(), "/docs/2024/report.pdf");
        assert_eq!(
            resolver.name_path(&store.get_node(&MPath::root()).unwrap()).unwrap(),
            "/"
        );
    }
}
