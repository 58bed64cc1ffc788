//! In-memory mirror of the node table.
//!
//! Four indices over the same set of nodes: exact path, parent to child ranks,
//! name to candidate paths (names repeat across the tree) and identifier. The
//! owning cache rebuilds it wholesale; it is never merged.

use crate::error::StorageError;
use crate::mpath::MPath;
use crate::types::TreeNode;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;

#[derive(Debug, Default)]
pub(crate) struct Mirror {
    by_path: BTreeMap<MPath, TreeNode>,
    children: HashMap<MPath, BTreeSet<u64>>,
    by_name: HashMap<String, Vec<MPath>>,
    by_uuid: HashMap<String, MPath>,
}

impl Mirror {
    pub(crate) fn from_nodes(nodes: impl IntoIterator<Item = TreeNode>) -> Self {
        let mut mirror = Mirror::default();
        for node in nodes {
            mirror.insert(node);
        }
        mirror
    }

    pub(crate) fn len(&self) -> usize {
        self.by_path.len()
    }

    /// Insert or replace the node at `node.mpath`.
    pub(crate) fn insert(&mut self, node: TreeNode) {
        self.remove(&node.mpath);
        if let Some(stale) = self.by_uuid.get(&node.uuid).cloned() {
            self.remove(&stale);
        }
        if let Some(parent) = node.mpath.parent() {
            self.children
                .entry(parent)
                .or_default()
                .insert(node.mpath.rank());
        }
        self.by_name
            .entry(node.name.clone())
            .or_default()
            .push(node.mpath.clone());
        self.by_uuid.insert(node.uuid.clone(), node.mpath.clone());
        self.by_path.insert(node.mpath.clone(), node);
    }

    /// Remove the exact node at `path`, leaving descendants in place.
    pub(crate) fn remove(&mut self, path: &MPath) -> Option<TreeNode> {
        let node = self.by_path.remove(path)?;
        if let Some(parent) = path.parent() {
            if let Some(ranks) = self.children.get_mut(&parent) {
                ranks.remove(&path.rank());
                if ranks.is_empty() {
                    self.children.remove(&parent);
                }
            }
        }
        if let Some(paths) = self.by_name.get_mut(&node.name) {
            paths.retain(|p| p != path);
            if paths.is_empty() {
                self.by_name.remove(&node.name);
            }
        }
        if self.by_uuid.get(&node.uuid) == Some(path) {
            self.by_uuid.remove(&node.uuid);
        }
        Some(node)
    }

    pub(crate) fn get(&self, path: &MPath) -> Option<&TreeNode> {
        self.by_path.get(path)
    }

    pub(crate) fn get_mut(&mut self, path: &MPath) -> Option<&mut TreeNode> {
        self.by_path.get_mut(path)
    }

    pub(crate) fn contains(&self, path: &MPath) -> bool {
        self.by_path.contains_key(path)
    }

    pub(crate) fn by_uuid(&self, uuid: &str) -> Option<&TreeNode> {
        self.by_uuid.get(uuid).and_then(|p| self.by_path.get(p))
    }

    /// Sibling ranks in use under `parent`, ascending.
    pub(crate) fn child_ranks(&self, parent: &MPath) -> Vec<u64> {
        self.children
            .get(parent)
            .map(|ranks| ranks.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Direct children ordered by name.
    pub(crate) fn children(&self, parent: &MPath) -> Vec<TreeNode> {
        let mut nodes: Vec<TreeNode> = self
            .child_ranks(parent)
            .into_iter()
            .filter_map(|rank| self.by_path.get(&parent.child(rank)).cloned())
            .collect();
        nodes.sort_by(|a, b| a.name.cmp(&b.name));
        nodes
    }

    pub(crate) fn child_named(&self, parent: &MPath, name: &str) -> Option<&TreeNode> {
        self.by_name
            .get(name)?
            .iter()
            .find(|p| p.parent().as_ref() == Some(parent))
            .and_then(|p| self.by_path.get(p))
    }

    /// Every node strictly below `root`, in path order.
    pub(crate) fn descendants(&self, root: &MPath) -> Vec<TreeNode> {
        self.by_path
            .range((Bound::Excluded(root.clone()), Bound::Unbounded))
            .take_while(|(p, _)| p.is_descendant_of(root))
            .map(|(_, n)| n.clone())
            .collect()
    }

    /// Lookup by the names of every level below the root.
    ///
    /// Candidates come from the name index and are filtered by depth, then by
    /// walking their parent chain. Zero or several survivors is `NotFound`.
    pub(crate) fn by_names(&self, names: &[&str]) -> Result<&TreeNode, StorageError> {
        let Some((last, ancestors)) = names.split_last() else {
            return self
                .by_path
                .get(&MPath::root())
                .ok_or_else(|| StorageError::NotFound("root is not cached".to_string()));
        };
        let level = names.len() + 1;
        let mut matches = self
            .by_name
            .get(*last)
            .into_iter()
            .flatten()
            .filter(|p| p.level() == level)
            .filter(|p| self.ancestors_named(p, ancestors));

        match (matches.next(), matches.next()) {
            (Some(path), None) => self
                .by_path
                .get(path)
                .ok_or_else(|| StorageError::Internal(format!("name index points at {}", path))),
            (None, _) => Err(StorageError::NotFound(format!(
                "no cached node at /{}",
                names.join("/")
            ))),
            (Some(_), Some(_)) => Err(StorageError::NotFound(format!(
                "several cached nodes match /{}",
                names.join("/")
            ))),
        }
    }

    fn ancestors_named(&self, path: &MPath, names: &[&str]) -> bool {
        let mut current = path.parent();
        for expected in names.iter().rev() {
            match current.as_ref().and_then(|p| self.by_path.get(p)) {
                Some(node) if node.name == *expected => current = node.mpath.parent(),
                _ => return false,
            }
        }
        true
    }
}
