//! Relational tree store.

use super::sql::{Connector, NODES_TABLE};
use super::{NodeStream, SetNodesBatch, TreeStore};
use crate::error::StorageError;
use crate::mpath::{MPath, MPathLayout, PathPredicate};
use crate::types::{ChildrenCounts, NodeType, TreeNode, DIRTY_ETAG};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Tree store over a SQL connection.
pub struct SqlTreeStore {
    db: Arc<dyn Connector>,
    layout: MPathLayout,
    table: String,
    select_cols: String,
}

/// Row as read from the database, before path decoding.
struct RawNode {
    uuid: String,
    level: i64,
    name: String,
    leaf: bool,
    etag: String,
    size: i64,
    mtime: i64,
    mode: i32,
    mpath: Vec<String>,
}

impl RawNode {
    fn read(row: &rusqlite::Row<'_>, columns: usize) -> rusqlite::Result<Self> {
        let mut mpath = Vec::with_capacity(columns);
        for i in 0..columns {
            mpath.push(row.get::<_, String>(8 + i)?);
        }
        Ok(Self {
            uuid: row.get(0)?,
            level: row.get(1)?,
            name: row.get(2)?,
            leaf: row.get(3)?,
            etag: row.get(4)?,
            size: row.get(5)?,
            mtime: row.get(6)?,
            mode: row.get(7)?,
            mpath,
        })
    }

    fn into_node(self, layout: &MPathLayout) -> Result<TreeNode, StorageError> {
        let mpath = layout.join(&self.mpath)?;
        if mpath.level() as i64 != self.level {
            return Err(StorageError::Codec(format!(
                "node {} stored at level {} but its path {} has level {}",
                self.uuid,
                self.level,
                mpath,
                mpath.level()
            )));
        }
        Ok(TreeNode {
            uuid: self.uuid,
            mpath,
            name: self.name,
            node_type: if self.leaf {
                NodeType::Leaf
            } else {
                NodeType::Collection
            },
            etag: self.etag,
            size: self.size,
            mtime: self.mtime,
            mode: self.mode,
        })
    }
}

impl SqlTreeStore {
    /// Build the store and make sure the root node exists.
    pub fn new(db: Arc<dyn Connector>) -> Result<Self, StorageError> {
        let layout = db.layout();
        let table = db.table(NODES_TABLE);
        let select_cols = format!(
            "uuid, level, name, leaf, etag, size, mtime, mode, {}",
            layout.column_names().join(", ")
        );
        let store = Self {
            db,
            layout,
            table,
            select_cols,
        };
        store.ensure_root()?;
        Ok(store)
    }

    pub fn layout(&self) -> MPathLayout {
        self.layout
    }

    pub(crate) fn connector(&self) -> &Arc<dyn Connector> {
        &self.db
    }

    fn ensure_root(&self) -> Result<(), StorageError> {
        let root = MPath::root();
        let conn = self.db.lock();
        if self.find_one(&conn, &self.layout.exact(&root)?)?.is_none() {
            self.insert(&conn, &TreeNode::root())?;
            info!("Created root node");
        }
        Ok(())
    }

    fn row_values(&self, node: &TreeNode) -> Result<Vec<Value>, StorageError> {
        let mut values = vec![
            Value::Text(node.uuid.clone()),
            Value::Text(node.mpath.digest()),
            Value::Integer(node.level() as i64),
            Value::Text(node.name.clone()),
            Value::Integer(node.is_leaf() as i64),
            Value::Text(node.etag.clone()),
            Value::Integer(node.size),
            Value::Integer(node.mtime),
            Value::Integer(node.mode as i64),
        ];
        values.extend(self.layout.split(&node.mpath)?.into_iter().map(Value::Text));
        Ok(values)
    }

    fn insert_sql(&self) -> String {
        let cols = self.layout.column_names();
        let placeholders = vec!["?"; 9 + cols.len()].join(", ");
        format!(
            "INSERT INTO {} (uuid, hash, level, name, leaf, etag, size, mtime, mode, {}) VALUES ({})",
            self.table,
            cols.join(", "),
            placeholders
        )
    }

    fn insert(&self, conn: &Connection, node: &TreeNode) -> Result<(), StorageError> {
        let values = self.row_values(node)?;
        conn.prepare_cached(&self.insert_sql())?
            .execute(params_from_iter(values))
            .map_err(|e| match StorageError::from(e) {
                StorageError::Conflict(_) => StorageError::Conflict(format!(
                    "node {} ({}) at {}",
                    node.name, node.uuid, node.mpath
                )),
                other => other,
            })?;
        Ok(())
    }

    fn find_many(
        &self,
        conn: &Connection,
        predicate: &PathPredicate,
        order: &str,
    ) -> Result<Vec<TreeNode>, StorageError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE {} {}",
            self.select_cols, self.table, predicate.clause, order
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let columns = self.layout.columns();
        let raw = stmt
            .query_map(params_from_iter(predicate.params.iter()), |row| {
                RawNode::read(row, columns)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        raw.into_iter().map(|r| r.into_node(&self.layout)).collect()
    }

    fn find_one(
        &self,
        conn: &Connection,
        predicate: &PathPredicate,
    ) -> Result<Option<TreeNode>, StorageError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE {} LIMIT 1",
            self.select_cols, self.table, predicate.clause
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let columns = self.layout.columns();
        let raw = stmt
            .query_row(params_from_iter(predicate.params.iter()), |row| {
                RawNode::read(row, columns)
            })
            .optional()?;
        raw.map(|r| r.into_node(&self.layout)).transpose()
    }

    fn exists(&self, conn: &Connection, path: &MPath) -> Result<bool, StorageError> {
        let predicate = self.layout.exact(path)?;
        let sql = format!(
            "SELECT 1 FROM {} WHERE {} LIMIT 1",
            self.table, predicate.clause
        );
        let found = conn
            .prepare_cached(&sql)?
            .query_row(params_from_iter(predicate.params.iter()), |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    fn order_by_path(&self) -> String {
        format!("ORDER BY {}", self.layout.column_names().join(", "))
    }

    /// Rewrite the path columns of the row identified by `uuid`.
    fn repath(
        &self,
        conn: &Connection,
        uuid: &str,
        path: &MPath,
        name: Option<&str>,
    ) -> Result<(), StorageError> {
        let cols = self.layout.column_names();
        let assignments = cols
            .iter()
            .map(|c| format!("{} = ?", c))
            .collect::<Vec<_>>()
            .join(", ");
        let mut values: Vec<Value> = vec![
            Value::Text(path.digest()),
            Value::Integer(path.level() as i64),
        ];
        values.extend(self.layout.split(path)?.into_iter().map(Value::Text));
        let sql = match name {
            Some(name) => {
                values.push(Value::Text(name.to_string()));
                format!(
                    "UPDATE {} SET hash = ?, level = ?, {}, name = ? WHERE uuid = ?",
                    self.table, assignments
                )
            }
            None => format!(
                "UPDATE {} SET hash = ?, level = ?, {} WHERE uuid = ?",
                self.table, assignments
            ),
        };
        values.push(Value::Text(uuid.to_string()));
        conn.prepare_cached(&sql)?.execute(params_from_iter(values))?;
        Ok(())
    }

    fn delete_where(
        &self,
        conn: &Connection,
        predicate: &PathPredicate,
    ) -> Result<usize, StorageError> {
        let sql = format!("DELETE FROM {} WHERE {}", self.table, predicate.clause);
        Ok(conn
            .prepare_cached(&sql)?
            .execute(params_from_iter(predicate.params.iter()))?)
    }
}

impl TreeStore for SqlTreeStore {
    fn add_node(&self, node: &TreeNode) -> Result<(), StorageError> {
        let conn = self.db.lock();
        if let Some(parent) = node.mpath.parent() {
            if !self.exists(&conn, &parent)? {
                return Err(StorageError::NotFound(format!(
                    "parent {} of {} does not exist",
                    parent, node.name
                )));
            }
        }
        self.insert(&conn, node)?;
        debug!(uuid = %node.uuid, mpath = %node.mpath, name = %node.name, "Added node");
        Ok(())
    }

    fn set_node(&self, node: &TreeNode) -> Result<(), StorageError> {
        let values = self.row_values(node)?;
        let sql = format!(
            "{} ON CONFLICT(hash) DO UPDATE SET uuid = excluded.uuid, name = excluded.name, \
             leaf = excluded.leaf, etag = excluded.etag, size = excluded.size, \
             mtime = excluded.mtime, mode = excluded.mode",
            self.insert_sql()
        );
        let conn = self.db.lock();
        conn.prepare_cached(&sql)?.execute(params_from_iter(values))?;
        debug!(uuid = %node.uuid, mpath = %node.mpath, etag = %node.etag, "Set node");
        Ok(())
    }

    fn set_nodes(&self, batch: &SetNodesBatch) -> Result<usize, StorageError> {
        let mut conn = self.db.lock();
        let tx = conn.transaction()?;
        let mut touched = 0;
        for target in batch.targets() {
            let predicate = self.layout.exact(target)?;
            let mut values: Vec<Value> = vec![Value::Integer(batch.size_delta())];
            let sql = match batch.etag() {
                Some(etag) => {
                    values.push(Value::Text(etag.to_string()));
                    format!(
                        "UPDATE {} SET size = size + ?, etag = ? WHERE {}",
                        self.table, predicate.clause
                    )
                }
                None => format!(
                    "UPDATE {} SET size = size + ? WHERE {}",
                    self.table, predicate.clause
                ),
            };
            values.extend(predicate.params.into_iter().map(Value::Text));
            touched += tx.prepare_cached(&sql)?.execute(params_from_iter(values))?;
        }
        tx.commit()?;
        debug!(
            targets = batch.len(),
            touched,
            size_delta = batch.size_delta(),
            "Applied ancestor batch"
        );
        Ok(touched)
    }

    fn del_node(&self, node: &TreeNode) -> Result<(), StorageError> {
        let conn = self.db.lock();
        let removed = self.delete_where(&conn, &self.layout.exact(&node.mpath)?)?;
        debug!(uuid = %node.uuid, mpath = %node.mpath, removed, "Deleted node");
        Ok(())
    }

    fn get_node(&self, path: &MPath) -> Result<TreeNode, StorageError> {
        let conn = self.db.lock();
        match self.find_one(&conn, &self.layout.exact(path)?)? {
            Some(node) => Ok(node),
            None if path.is_root() => {
                let root = TreeNode::root();
                self.insert(&conn, &root)?;
                Ok(root)
            }
            None => Err(StorageError::NotFound(format!("no node at {}", path))),
        }
    }

    fn get_node_by_uuid(&self, uuid: &str) -> Result<TreeNode, StorageError> {
        let conn = self.db.lock();
        let predicate = PathPredicate {
            clause: "uuid = ?".to_string(),
            params: vec![uuid.to_string()],
        };
        self.find_one(&conn, &predicate)?
            .ok_or_else(|| StorageError::NotFound(format!("no node with uuid {}", uuid)))
    }

    fn get_node_child(&self, parent: &MPath, name: &str) -> Result<TreeNode, StorageError> {
        let conn = self.db.lock();
        let mut predicate = self.layout.children(parent)?;
        predicate.clause.push_str(" AND name = ?");
        predicate.params.push(name.to_string());
        self.find_one(&conn, &predicate)?.ok_or_else(|| {
            StorageError::NotFound(format!("no child {:?} under {}", name, parent))
        })
    }

    fn get_node_children(&self, parent: &MPath) -> Result<NodeStream, StorageError> {
        let conn = self.db.lock();
        let nodes = self.find_many(
            &conn,
            &self.layout.children(parent)?,
            "ORDER BY name",
        )?;
        Ok(nodes.into_iter())
    }

    fn get_node_tree(&self, root: &MPath) -> Result<NodeStream, StorageError> {
        let conn = self.db.lock();
        let mut nodes = self.find_many(
            &conn,
            &self.layout.descendants(root)?,
            &self.order_by_path(),
        )?;
        // text order puts 1.10 before 1.9; callers get numeric rank order
        nodes.sort_by(|a, b| a.mpath.cmp(&b.mpath));
        Ok(nodes.into_iter())
    }

    fn get_dirty_collections(&self, root: &MPath) -> Result<NodeStream, StorageError> {
        let mut predicate = self.layout.descendants(root)?;
        predicate.clause = format!("{} AND leaf = 0 AND etag = ?", predicate.clause);
        predicate.params.push(DIRTY_ETAG.to_string());
        let conn = self.db.lock();
        let nodes = self.find_many(&conn, &predicate, "ORDER BY level DESC")?;
        Ok(nodes.into_iter())
    }

    fn get_node_children_count(&self, parent: &MPath) -> Result<usize, StorageError> {
        let predicate = self.layout.children(parent)?;
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {}",
            self.table, predicate.clause
        );
        let conn = self.db.lock();
        let count: i64 = conn
            .prepare_cached(&sql)?
            .query_row(params_from_iter(predicate.params.iter()), |row| row.get(0))?;
        Ok(count as usize)
    }

    fn get_node_children_counts(&self, parent: &MPath) -> Result<ChildrenCounts, StorageError> {
        let predicate = self.layout.children(parent)?;
        let sql = format!(
            "SELECT leaf, COUNT(*) FROM {} WHERE {} GROUP BY leaf",
            self.table, predicate.clause
        );
        let conn = self.db.lock();
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(predicate.params.iter()), |row| {
                Ok((row.get::<_, bool>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let mut counts = ChildrenCounts::default();
        for (leaf, count) in rows {
            if leaf {
                counts.leaves = count as usize;
            } else {
                counts.collections = count as usize;
            }
        }
        Ok(counts)
    }

    fn move_node_tree(&self, from: &TreeNode, to: &TreeNode) -> Result<(), StorageError> {
        if from.mpath.is_root() {
            return Err(StorageError::InvalidArgument("cannot move the root".to_string()));
        }
        if to.mpath.is_descendant_of(&from.mpath) {
            return Err(StorageError::InvalidArgument(format!(
                "cannot move {} into its own subtree {}",
                from.mpath, to.mpath
            )));
        }
        if from.mpath.is_descendant_of(&to.mpath) {
            return Err(StorageError::InvalidArgument(format!(
                "cannot move {} onto its ancestor {}",
                from.mpath, to.mpath
            )));
        }

        let mut conn = self.db.lock();
        let tx = conn.transaction()?;

        let descendants = self.find_many(
            &tx,
            &self.layout.descendants(&from.mpath)?,
            &self.order_by_path(),
        )?;

        if to.mpath != from.mpath {
            let mut occupied = self.layout.exact(&to.mpath)?;
            occupied.clause.push_str(" AND uuid <> ?");
            occupied.params.push(from.uuid.clone());
            let replaced = self.delete_where(&tx, &occupied)?;
            let orphaned = self.delete_where(&tx, &self.layout.descendants(&to.mpath)?)?;
            if orphaned > 0 {
                warn!(
                    destination = %to.mpath,
                    orphaned,
                    "Move destination had descendants, removed them"
                );
            }
            debug!(destination = %to.mpath, replaced, "Cleared move destination");
        }

        self.repath(&tx, &from.uuid, &to.mpath, Some(&to.name))?;
        for node in &descendants {
            let target = node.mpath.rebase(&from.mpath, &to.mpath).ok_or_else(|| {
                StorageError::Internal(format!(
                    "{} is not below {} during move",
                    node.mpath, from.mpath
                ))
            })?;
            self.repath(&tx, &node.uuid, &target, None)?;
        }
        tx.commit()?;

        info!(
            uuid = %from.uuid,
            from = %from.mpath,
            to = %to.mpath,
            descendants = descendants.len(),
            "Moved node tree"
        );
        Ok(())
    }

    fn flush(&self, final_flush: bool) -> Result<(), StorageError> {
        debug!(final_flush, "Flush on direct store is a no-op");
        Ok(())
    }

    fn clean_resources_on_deletion(&self) -> Result<String, StorageError> {
        let commits = self.db.table(super::sql::COMMITS_TABLE);
        let conn = self.db.lock();
        conn.execute_batch(&format!(
            "DROP TABLE IF EXISTS {}; DROP TABLE IF EXISTS {};",
            self.table, commits
        ))?;
        let message = format!("Removed tables {} and {}", self.table, commits);
        info!(%message, "Cleaned index resources");
        Ok(message)
    }
}
