//! Tree Service
//!
//! In-process façade over the index: string paths in, [`TreeNode`]s out, every
//! failure converted to [`ApiError`]. When a request names a session, writes go
//! through that session's cache and ancestor updates and events are deferred to
//! its batcher; otherwise ancestors are updated and events published at once.

use crate::config::{IndexConfig, SessionConfig};
use crate::error::{ApiError, StorageError};
use crate::etag::resync_dirty_etags;
use crate::events::{EventPublisher, NodeChangeEvent, NoopPublisher};
use crate::mpath::MPath;
use crate::resolver::{split_path, PathResolver};
use crate::session::{BatchFlush, Session, SessionRegistry};
use crate::store::{
    should_push_commit, CommitStore, SetNodesBatch, SqlTreeStore, SqliteConnector, TreeStore,
};
use crate::types::{CommitEntry, TreeNode, DIRTY_ETAG};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Create a node at `path`.
#[derive(Debug, Clone)]
pub struct CreateNodeRequest {
    pub path: String,
    /// Type and content of the new node. Its name and location are taken from
    /// `path`; an empty `uuid` gets a fresh one.
    pub node: TreeNode,
    /// Update content in place when the path exists, and replace the holder
    /// of `node.uuid` when it lives elsewhere.
    pub update_if_exists: bool,
    pub session: Option<String>,
}

impl CreateNodeRequest {
    pub fn new(path: impl Into<String>, node: TreeNode) -> Self {
        Self {
            path: path.into(),
            node,
            update_if_exists: false,
            session: None,
        }
    }

    pub fn update_if_exists(mut self) -> Self {
        self.update_if_exists = true;
        self
    }

    pub fn in_session(mut self, id: impl Into<String>) -> Self {
        self.session = Some(id.into());
        self
    }
}

/// Identify a node by path or identifier.
#[derive(Debug, Clone, Default)]
pub struct NodeRef {
    pub path: Option<String>,
    pub uuid: Option<String>,
}

impl NodeRef {
    pub fn path(path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            uuid: None,
        }
    }

    pub fn uuid(uuid: impl Into<String>) -> Self {
        Self {
            path: None,
            uuid: Some(uuid.into()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReadNodeRequest {
    pub node: NodeRef,
    pub with_etags: bool,
    pub with_commits: bool,
    pub session: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadNodeResponse {
    pub node: TreeNode,
    pub path: String,
    pub commits: Vec<CommitEntry>,
}

/// Move or rename `from` to the name path `to`.
#[derive(Debug, Clone)]
pub struct UpdateNodeRequest {
    pub from: NodeRef,
    pub to: String,
    pub session: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DeleteNodeRequest {
    pub node: NodeRef,
    pub session: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ListNodesRequest {
    pub path: String,
    pub recursive: bool,
    pub with_etags: bool,
    pub limit: Option<usize>,
    pub session: Option<String>,
}

/// Routing for one request: the tree to use and the session, if any.
struct Route {
    tree: Arc<dyn TreeStore>,
    session: Option<Arc<Session>>,
}

pub struct TreeService {
    store: Arc<SqlTreeStore>,
    sessions: SessionRegistry,
    publisher: Arc<dyn EventPublisher>,
    config: SessionConfig,
}

impl TreeService {
    pub fn new(
        store: Arc<SqlTreeStore>,
        publisher: Arc<dyn EventPublisher>,
        config: SessionConfig,
    ) -> Self {
        let sessions = SessionRegistry::new(
            Arc::clone(&store) as Arc<dyn TreeStore>,
            Arc::clone(&publisher),
            config.insert_buffer,
        );
        Self {
            store,
            sessions,
            publisher,
            config,
        }
    }

    /// Open the database described by `config`.
    pub fn open(config: &IndexConfig, publisher: Arc<dyn EventPublisher>) -> Result<Self, ApiError> {
        let path = config.storage.resolve_database_path()?;
        let db = Arc::new(SqliteConnector::open(&path, &config.storage)?);
        let store = Arc::new(SqlTreeStore::new(db)?);
        Ok(Self::new(store, publisher, config.session.clone()))
    }

    /// In-memory index, events discarded.
    pub fn in_memory(config: &IndexConfig) -> Result<Self, ApiError> {
        let db = Arc::new(SqliteConnector::open_in_memory(&config.storage)?);
        let store = Arc::new(SqlTreeStore::new(db)?);
        Ok(Self::new(store, Arc::new(NoopPublisher), config.session.clone()))
    }

    pub fn store(&self) -> &Arc<SqlTreeStore> {
        &self.store
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    fn route(&self, session: Option<&str>, open: bool) -> Result<Route, StorageError> {
        let session = match session {
            Some(id) if open => Some(self.sessions.open(id)?),
            Some(id) => self.sessions.get(id),
            None => None,
        };
        let tree = match &session {
            Some(s) => s.tree(),
            None => Arc::clone(&self.store) as Arc<dyn TreeStore>,
        };
        Ok(Route { tree, session })
    }

    fn emit(&self, route: &Route, event: NodeChangeEvent) {
        match &route.session {
            Some(session) => session.batcher().notify(event),
            None => self.publisher.publish(event),
        }
    }

    /// Shift every ancestor of `path` by `delta` and mark it dirty.
    fn touch_ancestors(&self, route: &Route, path: &MPath, delta: i64) -> Result<(), StorageError> {
        match &route.session {
            Some(session) => {
                for ancestor in path.ancestors() {
                    session.batcher().update_mpath(ancestor, delta);
                }
                Ok(())
            }
            None => {
                let mut batch = SetNodesBatch::new(Some(DIRTY_ETAG), delta);
                batch.extend(path.ancestors());
                batch.close(route.tree.as_ref()).map(|_| ())
            }
        }
    }

    fn locate(&self, tree: &dyn TreeStore, node: &NodeRef) -> Result<TreeNode, StorageError> {
        match (&node.uuid, &node.path) {
            (Some(uuid), _) if !uuid.is_empty() => tree.get_node_by_uuid(uuid),
            (_, Some(path)) => {
                let resolved = PathResolver::new(tree).resolve(path, false, None)?;
                tree.get_node(&resolved.mpath)
            }
            _ => Err(StorageError::InvalidArgument(
                "a node path or identifier is required".to_string(),
            )),
        }
    }

    pub fn create_node(&self, req: CreateNodeRequest) -> Result<TreeNode, ApiError> {
        if split_path(&req.path)?.is_empty() {
            return Err(ApiError::InvalidArgument("the root cannot be created".to_string()));
        }
        let route = self.route(req.session.as_deref(), true)?;
        let mut attempt = 0;
        loop {
            match self.try_create(&route, &req) {
                Err(e) if e.is_conflict() && attempt < self.config.conflict_retries => {
                    attempt += 1;
                    warn!(path = %req.path, attempt, error = %e, "Create lost a race, re-resolving");
                }
                result => return result.map_err(ApiError::from),
            }
        }
    }

    fn try_create(&self, route: &Route, req: &CreateNodeRequest) -> Result<TreeNode, StorageError> {
        let tree = route.tree.as_ref();
        let resolver = PathResolver::new(tree);

        match resolver.resolve(&req.path, false, None) {
            Ok(existing) => {
                let existing = tree.get_node(&existing.mpath)?;
                if !req.update_if_exists {
                    return Err(StorageError::Conflict(req.path.clone()));
                }
                return self.update_content(route, existing, &req.node);
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        if !req.node.uuid.is_empty() {
            match tree.get_node_by_uuid(&req.node.uuid) {
                Ok(holder) if req.update_if_exists => {
                    info!(uuid = %holder.uuid, mpath = %holder.mpath, "Replacing previous holder of identifier");
                    self.remove_subtree(route, &holder)?;
                }
                Ok(_) => {
                    return Err(StorageError::Conflict(format!("identifier {}", req.node.uuid)))
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }

        let resolved = resolver.resolve(&req.path, true, Some(req.node.clone()))?;
        let Some(created) = resolved.created.last().cloned() else {
            // someone else created the final segment between the two resolutions
            return Err(StorageError::Conflict(req.path.clone()));
        };

        let delta = if created.is_leaf() { created.size } else { 0 };
        self.touch_ancestors(route, &created.mpath, delta)?;
        if should_push_commit(None, &created) {
            self.store.push_commit(&created)?;
        }
        for node in resolved.created {
            self.emit(route, NodeChangeEvent::created(node));
        }
        debug!(path = %req.path, mpath = %created.mpath, "Created node");
        Ok(created)
    }

    fn update_content(
        &self,
        route: &Route,
        existing: TreeNode,
        content: &TreeNode,
    ) -> Result<TreeNode, StorageError> {
        if existing.node_type != content.node_type {
            return Err(StorageError::Conflict(format!(
                "{} exists with another type",
                existing.name
            )));
        }
        if existing.is_collection() {
            return Ok(existing);
        }

        let mut updated = existing.clone();
        updated.etag = content.etag.clone();
        updated.size = content.size;
        updated.mtime = content.mtime;
        updated.mode = content.mode;
        route.tree.set_node(&updated)?;

        self.touch_ancestors(route, &updated.mpath, updated.size - existing.size)?;
        if should_push_commit(Some(&existing.etag), &updated) {
            self.store.push_commit(&updated)?;
        }
        self.emit(route, NodeChangeEvent::updated(existing, updated.clone()));
        Ok(updated)
    }

    /// Delete `node`, its descendants and all their histories. Returns the
    /// number of nodes removed and the leaf bytes they held.
    fn remove_subtree(&self, route: &Route, node: &TreeNode) -> Result<(usize, i64), StorageError> {
        let tree = route.tree.as_ref();
        let descendants: Vec<TreeNode> = tree.get_node_tree(&node.mpath)?.collect();
        let mut bytes = if node.is_leaf() { node.size } else { 0 };
        for child in descendants.iter().rev() {
            if child.is_leaf() {
                bytes += child.size;
            }
            tree.del_node(child)?;
            self.store.delete_commits(child)?;
        }
        tree.del_node(node)?;
        self.store.delete_commits(node)?;
        if let Some(session) = &route.session {
            session.batcher().forget_subtree(&node.mpath);
        }
        self.touch_ancestors(route, &node.mpath, -bytes)?;
        Ok((descendants.len() + 1, bytes))
    }

    pub fn read_node(&self, req: ReadNodeRequest) -> Result<ReadNodeResponse, ApiError> {
        let route = self.route(req.session.as_deref(), false)?;
        let tree = route.tree.as_ref();
        let mut node = self.locate(tree, &req.node)?;
        if req.with_etags && node.is_collection() {
            resync_dirty_etags(tree, &node)?;
            node = tree.get_node(&node.mpath)?;
        }
        let commits = if req.with_commits && node.is_leaf() {
            match self.store.list_commits(&node) {
                Ok(commits) => commits,
                Err(e) if e.is_not_found() => Vec::new(),
                Err(e) => return Err(e.into()),
            }
        } else {
            Vec::new()
        };
        let path = PathResolver::new(tree).name_path(&node)?;
        Ok(ReadNodeResponse { node, path, commits })
    }

    /// Move or rename a node. The destination's parent is created if missing;
    /// an existing destination is replaced.
    pub fn update_node(&self, req: UpdateNodeRequest) -> Result<TreeNode, ApiError> {
        let route = self.route(req.session.as_deref(), true)?;
        let tree = route.tree.as_ref();
        let from = self.locate(tree, &req.from)?;
        if from.mpath.is_root() {
            return Err(ApiError::InvalidArgument("the root cannot be moved".to_string()));
        }

        let mut segments = split_path(&req.to)?;
        let Some(name) = segments.pop() else {
            return Err(ApiError::InvalidArgument("destination cannot be the root".to_string()));
        };
        let resolver = PathResolver::new(tree);
        let from_path = resolver.name_path(&from)?;
        let parent_path = format!("/{}", segments.join("/"));
        if parent_path == from_path || parent_path.starts_with(&format!("{}/", from_path)) {
            return Err(ApiError::InvalidArgument(format!(
                "cannot move {} into itself",
                from_path
            )));
        }

        let parent = resolver.resolve(&parent_path, true, None)?;
        for node in parent.created {
            self.emit(&route, NodeChangeEvent::created(node));
        }
        match tree.get_node_child(&parent.mpath, &name) {
            Ok(existing) if existing.uuid == from.uuid => return Ok(from),
            Ok(existing) if from.mpath.is_descendant_of(&existing.mpath) => {
                return Err(ApiError::InvalidArgument(format!(
                    "cannot move {} over its ancestor {}",
                    from_path, req.to
                )));
            }
            Ok(existing) => {
                info!(mpath = %existing.mpath, "Move destination exists, replacing it");
                self.remove_subtree(&route, &existing)?;
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        let moved_bytes: i64 = if from.is_leaf() {
            from.size
        } else {
            tree.get_node_tree(&from.mpath)?
                .filter(|n| n.is_leaf())
                .map(|n| n.size)
                .sum()
        };
        let rank = tree.get_node_first_available_child_index(&parent.mpath)?;
        let mut target = from.clone();
        target.mpath = parent.mpath.child(rank);
        target.name = name;

        tree.move_node_tree(&from, &target)?;
        if let Some(session) = &route.session {
            session.batcher().rebase_subtree(&from.mpath, &target.mpath);
        }
        self.touch_ancestors(&route, &from.mpath, -moved_bytes)?;
        self.touch_ancestors(&route, &target.mpath, moved_bytes)?;

        let moved = tree.get_node_by_uuid(&from.uuid)?;
        info!(uuid = %moved.uuid, from = %from.mpath, to = %moved.mpath, "Moved node");
        self.emit(&route, NodeChangeEvent::moved(from, moved.clone()));
        Ok(moved)
    }

    /// Delete a node and its subtree. Returns the number of nodes removed.
    pub fn delete_node(&self, req: DeleteNodeRequest) -> Result<usize, ApiError> {
        let route = self.route(req.session.as_deref(), true)?;
        let node = self.locate(route.tree.as_ref(), &req.node)?;
        if node.mpath.is_root() {
            return Err(ApiError::InvalidArgument("the root cannot be deleted".to_string()));
        }
        let (removed, bytes) = self.remove_subtree(&route, &node)?;
        info!(uuid = %node.uuid, mpath = %node.mpath, removed, bytes, "Deleted node");
        self.emit(&route, NodeChangeEvent::deleted(node));
        Ok(removed)
    }

    /// Children of `path` (every descendant when recursive). Listing a leaf
    /// returns the leaf itself.
    pub fn list_nodes(&self, req: ListNodesRequest) -> Result<Vec<TreeNode>, ApiError> {
        let route = self.route(req.session.as_deref(), false)?;
        let tree = route.tree.as_ref();
        let resolved = PathResolver::new(tree).resolve(&req.path, false, None)?;
        let node = tree.get_node(&resolved.mpath)?;
        if node.is_leaf() {
            return Ok(vec![node]);
        }
        if req.with_etags {
            resync_dirty_etags(tree, &node)?;
        }
        let nodes = if req.recursive {
            tree.get_node_tree(&node.mpath)?
        } else {
            tree.get_node_children(&node.mpath)?
        };
        Ok(match req.limit {
            Some(limit) => nodes.take(limit).collect(),
            None => nodes.collect(),
        })
    }

    /// Recompute dirty collection etags under `path`.
    pub fn resync(&self, path: &str, session: Option<&str>) -> Result<usize, ApiError> {
        let route = self.route(session, false)?;
        let tree = route.tree.as_ref();
        let resolved = PathResolver::new(tree).resolve(path, false, None)?;
        let node = tree.get_node(&resolved.mpath)?;
        Ok(resync_dirty_etags(tree, &node)?)
    }

    /// Full name path of a node.
    pub fn node_path(&self, node: &TreeNode) -> Result<String, ApiError> {
        Ok(PathResolver::new(self.store.as_ref()).name_path(node)?)
    }

    pub fn list_commits(&self, path: &str) -> Result<Vec<CommitEntry>, ApiError> {
        let node = self.locate(self.store.as_ref(), &NodeRef::path(path))?;
        Ok(self.store.list_commits(&node)?)
    }

    pub fn open_session(&self, id: &str) -> Result<(), ApiError> {
        self.sessions.open(id)?;
        Ok(())
    }

    pub fn flush_session(&self, id: &str) -> Result<BatchFlush, ApiError> {
        Ok(self.sessions.flush(id, false)?)
    }

    pub fn close_session(&self, id: &str) -> Result<BatchFlush, ApiError> {
        Ok(self.sessions.close(id)?)
    }

    /// Close every session and drop the index tables.
    pub fn clean_resources(&self) -> Result<String, ApiError> {
        for (id, e) in self.sessions.shutdown() {
            warn!(session = %id, error = %e, "Discarding session before cleanup");
        }
        Ok(self.store.clean_resources_on_deletion()?)
    }
}

impl Drop for TreeService {
    fn drop(&mut self) {
        for (id, e) in self.sessions.shutdown() {
            warn!(session = %id, error = %e, "Session lost on service shutdown");
        }
    }
}
