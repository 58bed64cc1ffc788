//! Commit log table.

use super::sql::COMMITS_TABLE;
use super::{CommitStore, SqlTreeStore};
use crate::error::StorageError;
use crate::types::{CommitEntry, TreeNode};
use rusqlite::params;
use tracing::debug;

impl CommitStore for SqlTreeStore {
    fn push_commit(&self, node: &TreeNode) -> Result<(), StorageError> {
        let entry = CommitEntry::from_node(node);
        let table = self.connector().table(COMMITS_TABLE);
        let conn = self.connector().lock();
        conn.prepare_cached(&format!(
            "INSERT INTO {} (uuid, etag, mtime, size) VALUES (?1, ?2, ?3, ?4)",
            table
        ))?
        .execute(params![node.uuid, entry.etag, entry.mtime, entry.size])?;
        debug!(uuid = %node.uuid, etag = %entry.etag, "Pushed commit");
        Ok(())
    }

    fn list_commits(&self, node: &TreeNode) -> Result<Vec<CommitEntry>, StorageError> {
        let table = self.connector().table(COMMITS_TABLE);
        let conn = self.connector().lock();
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT etag, mtime, size FROM {} WHERE uuid = ?1 ORDER BY id DESC",
            table
        ))?;
        let entries = stmt
            .query_map(params![node.uuid], |row| {
                let etag: String = row.get(0)?;
                Ok(CommitEntry {
                    uuid: etag.clone(),
                    etag,
                    mtime: row.get(1)?,
                    size: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        if entries.is_empty() {
            return Err(StorageError::NotFound(format!(
                "no commits recorded for {}",
                node.uuid
            )));
        }
        Ok(entries)
    }

    fn delete_commits(&self, node: &TreeNode) -> Result<(), StorageError> {
        let table = self.connector().table(COMMITS_TABLE);
        let conn = self.connector().lock();
        let removed = conn
            .prepare_cached(&format!("DELETE FROM {} WHERE uuid = ?1", table))?
            .execute(params![node.uuid])?;
        debug!(uuid = %node.uuid, removed, "Deleted commits");
        Ok(())
    }
}
