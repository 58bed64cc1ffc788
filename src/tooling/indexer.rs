//! Bulk indexation of a local directory.
//!
//! Walks a directory tree and mirrors it into the index through one bulk
//! session: directories become collections, regular files become leaves whose
//! etag is the blake3 digest of their content.

use crate::error::{ApiError, StorageError};
use crate::service::{CreateNodeRequest, TreeService};
use crate::types::{new_uuid, TreeNode};
use serde::Serialize;
use std::fs::File;
use std::path::Path;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexSummary {
    pub collections: usize,
    pub leaves: usize,
    pub bytes: i64,
    pub flushes: usize,
    pub skipped: usize,
}

pub struct DirectoryIndexer<'a> {
    service: &'a TreeService,
    prefix: String,
    flush_every: usize,
}

impl<'a> DirectoryIndexer<'a> {
    /// Index under the name path `prefix` (`/` for the root).
    pub fn new(service: &'a TreeService, prefix: impl Into<String>) -> Self {
        Self {
            service,
            prefix: prefix.into(),
            flush_every: 10_000,
        }
    }

    /// Flush the session after this many nodes; 0 flushes only at the end.
    pub fn flush_every(mut self, nodes: usize) -> Self {
        self.flush_every = nodes;
        self
    }

    pub fn run(&self, dir: &Path) -> Result<IndexSummary, ApiError> {
        let root = dunce::canonicalize(dir).map_err(StorageError::from)?;
        let session = format!("index-{}", new_uuid());
        self.service.open_session(&session)?;
        info!(dir = %root.display(), prefix = %self.prefix, %session, "Indexing directory");

        let mut summary = IndexSummary::default();
        let walked = self.walk(&root, &session, &mut summary);
        let closed = self.service.close_session(&session);
        walked?;
        closed?;
        summary.flushes += 1;

        info!(
            collections = summary.collections,
            leaves = summary.leaves,
            bytes = summary.bytes,
            skipped = summary.skipped,
            "Indexed directory"
        );
        Ok(summary)
    }

    fn walk(&self, root: &Path, session: &str, summary: &mut IndexSummary) -> Result<(), ApiError> {
        let walker = WalkDir::new(root)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name();
        let mut since_flush = 0;

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable entry");
                    summary.skipped += 1;
                    continue;
                }
            };
            let Ok(relative) = entry.path().strip_prefix(root) else {
                summary.skipped += 1;
                continue;
            };
            let name_path = self.name_path(relative);
            let file_type = entry.file_type();

            let node = if file_type.is_dir() {
                summary.collections += 1;
                TreeNode::collection("")
            } else if file_type.is_file() {
                let leaf = hash_file(entry.path())?;
                summary.leaves += 1;
                summary.bytes += leaf.size;
                leaf
            } else {
                debug!(path = %entry.path().display(), "Skipping special file");
                summary.skipped += 1;
                continue;
            };

            self.service.create_node(
                CreateNodeRequest::new(name_path, node)
                    .update_if_exists()
                    .in_session(session),
            )?;

            since_flush += 1;
            if self.flush_every > 0 && since_flush >= self.flush_every {
                self.service.flush_session(session)?;
                summary.flushes += 1;
                since_flush = 0;
            }
        }
        Ok(())
    }

    fn name_path(&self, relative: &Path) -> String {
        let mut segments: Vec<String> = self
            .prefix
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        segments.extend(
            relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned()),
        );
        format!("/{}", segments.join("/"))
    }
}

/// Leaf for a regular file, content hashed with blake3.
fn hash_file(path: &Path) -> Result<TreeNode, ApiError> {
    let mut file = File::open(path).map_err(StorageError::from)?;
    let mut hasher = blake3::Hasher::new();
    std::io::copy(&mut file, &mut hasher).map_err(StorageError::from)?;
    let metadata = file.metadata().map_err(StorageError::from)?;

    let mut leaf = TreeNode::leaf("", hex::encode(hasher.finalize().as_bytes()), metadata.len() as i64);
    if let Ok(modified) = metadata.modified() {
        leaf.mtime = chrono::DateTime::<chrono::Utc>::from(modified).timestamp();
    }
    Ok(leaf)
}
