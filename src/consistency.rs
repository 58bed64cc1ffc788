//! Consistency check ("lost and found").
//!
//! Subtree deletion is the caller's job, so an interrupted caller can leave
//! nodes whose parent row is gone. `scan` finds those orphans together with
//! siblings sharing a name; `repair` removes orphan subtrees.

use crate::error::StorageError;
use crate::mpath::MPath;
use crate::store::{CommitStore, TreeStore};
use crate::types::TreeNode;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct DuplicateName {
    pub parent: MPath,
    pub name: String,
    pub nodes: Vec<TreeNode>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConsistencyReport {
    pub scanned: usize,
    /// Topmost nodes whose parent path has no row.
    pub orphans: Vec<TreeNode>,
    pub duplicates: Vec<DuplicateName>,
}

impl ConsistencyReport {
    pub fn is_clean(&self) -> bool {
        self.orphans.is_empty() && self.duplicates.is_empty()
    }
}

pub fn scan(store: &dyn TreeStore) -> Result<ConsistencyReport, StorageError> {
    let root = store.get_node(&MPath::root())?;
    let nodes: Vec<TreeNode> = store.get_node_tree(&root.mpath)?.collect();

    let mut present: HashSet<MPath> = nodes.iter().map(|n| n.mpath.clone()).collect();
    present.insert(root.mpath.clone());

    let mut orphans = Vec::new();
    let mut by_name: BTreeMap<(MPath, String), Vec<TreeNode>> = BTreeMap::new();
    for node in &nodes {
        let Some(parent) = node.mpath.parent() else {
            continue;
        };
        if !present.contains(&parent) {
            // only the topmost missing level is reported, descendants go with it
            if !orphans
                .iter()
                .any(|o: &TreeNode| node.mpath.is_descendant_of(&o.mpath))
            {
                orphans.push(node.clone());
            }
            continue;
        }
        by_name
            .entry((parent, node.name.clone()))
            .or_default()
            .push(node.clone());
    }

    let duplicates = by_name
        .into_iter()
        .filter(|(_, nodes)| nodes.len() > 1)
        .map(|((parent, name), nodes)| DuplicateName {
            parent,
            name,
            nodes,
        })
        .collect::<Vec<_>>();

    let report = ConsistencyReport {
        scanned: nodes.len() + 1,
        orphans,
        duplicates,
    };
    if report.is_clean() {
        info!(scanned = report.scanned, "Index is consistent");
    } else {
        warn!(
            scanned = report.scanned,
            orphans = report.orphans.len(),
            duplicates = report.duplicates.len(),
            "Index inconsistencies found"
        );
    }
    Ok(report)
}

/// Delete every orphan subtree listed in `report` with its histories.
/// Returns the number of nodes removed.
pub fn repair(
    store: &dyn TreeStore,
    commits: &dyn CommitStore,
    report: &ConsistencyReport,
) -> Result<usize, StorageError> {
    let mut removed = 0;
    for orphan in &report.orphans {
        let subtree: Vec<TreeNode> = store.get_node_tree(&orphan.mpath)?.collect();
        for node in subtree.iter().rev().chain(std::iter::once(orphan)) {
            store.del_node(node)?;
            commits.delete_commits(node)?;
            removed += 1;
        }
        info!(mpath = %orphan.mpath, name = %orphan.name, nodes = subtree.len() + 1, "Removed orphan subtree");
    }
    Ok(removed)
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

    #[test]
    fn test_clean_tree_reports_nothing() {
        let store = store();
        PathResolver::new(&store).resolve("/a/b/c", true, None).unwrap();
        let report = scan(&store).unwrap();
        assert!(report.is_clean());
        assert_eq!(report.scanned, 4);
    }

    #[test]
    fn test_orphans_found_and_repaired() {
        let store = store();
        let resolver = PathResolver::new(&store);
        resolver
            .resolve("/a/b/c", true, Some(TreeNode::leaf("", "e", 1)))
            .unwrap();
        resolver.resolve("/keep", true, None).unwrap();
        let a = store.get_node_child(&MPath::root(), "a").unwrap();
        store.del_node(&a).unwrap();

        let report = scan(&store).unwrap();
        assert_eq!(report.orphans.len(), 1);
        assert_eq!(report.orphans[0].name, "b");

        assert_eq!(repair(&store, &store, &report).unwrap(), 2);
        assert!(scan(&store).unwrap().is_clean());
        assert_eq!(store.get_node_tree(&MPath::root()).unwrap().count(), 1);
    }

    #[test]
    fn test_duplicate_names_reported() {
        let store = store();
        for rank in [1u64, 2] {
            let mut n = TreeNode::collection("twin");
            n.mpath = MPath::root().child(rank);
            store.add_node(&n).unwrap();
        }
        let report = scan(&store).unwrap();
        assert_eq!(report.duplicates.len(), 1);
        assert_eq!(report.duplicates[0].nodes.len(), 2);
    }
}
