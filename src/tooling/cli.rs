//! CLI Tooling
//!
//! Command-line interface over [`TreeService`]. Every command returns its output
//! as a string; `text` output uses tables, `json` output is pretty-printed.

use crate::config::{ConfigLoader, IndexConfig};
use crate::consistency;
use crate::error::ApiError;
use crate::events::NoopPublisher;
use crate::logging::LoggingConfig;
use crate::store::TreeStore;
use crate::service::{
    CreateNodeRequest, DeleteNodeRequest, ListNodesRequest, NodeRef, ReadNodeRequest,
    TreeService, UpdateNodeRequest,
};
use crate::tooling::indexer::DirectoryIndexer;
use crate::types::{CommitEntry, TreeNode};
use clap::{Parser, Subcommand};
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::Table;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// treeindex - hierarchical file-tree index over SQLite
#[derive(Parser)]
#[command(name = "treeindex")]
#[command(about = "Hierarchical file-tree index using sharded materialized paths")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Database file (overrides storage.database_path)
    #[arg(long, global = true)]
    pub database: Option<PathBuf>,

    /// Configuration file path (layered over the global config)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true, default_value = "false")]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long, global = true)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file, file+stderr, both)
    #[arg(long, global = true)]
    pub log_output: Option<String>,

    /// Log file path (if output includes "file")
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

impl Cli {
    /// Logging settings from `base` with command-line overrides applied.
    pub fn logging_config(&self, base: &LoggingConfig) -> LoggingConfig {
        let mut config = base.clone();
        if self.verbose {
            config.level = "debug".to_string();
        }
        if let Some(level) = &self.log_level {
            config.level = level.clone();
        }
        if let Some(format) = &self.log_format {
            config.format = format.clone();
        }
        if let Some(output) = &self.log_output {
            config.output = output.clone();
        }
        if let Some(file) = &self.log_file {
            config.file = Some(file.clone());
        }
        config
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Create a collection and any missing ancestors
    Mkdir {
        path: String,
    },
    /// Create or update a leaf
    Put {
        path: String,
        /// Content fingerprint
        #[arg(long)]
        etag: String,
        /// Content size in bytes
        #[arg(long, default_value = "0")]
        size: i64,
        /// Update the leaf in place if it exists
        #[arg(long)]
        update: bool,
    },
    /// Show one node
    Stat {
        path: String,
        /// Recompute dirty collection etags first
        #[arg(long)]
        etags: bool,
        /// Include the commit log of a leaf
        #[arg(long)]
        commits: bool,
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// List children of a collection
    Ls {
        #[arg(default_value = "/")]
        path: String,
        /// List every descendant
        #[arg(long, short = 'r')]
        recursive: bool,
        /// Recompute dirty collection etags first
        #[arg(long)]
        etags: bool,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Move or rename a node
    Mv {
        from: String,
        to: String,
    },
    /// Delete a node and its subtree
    Rm {
        path: String,
    },
    /// Show the commit log of a leaf
    Log {
        path: String,
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Index a local directory through a bulk session
    Index {
        dir: PathBuf,
        /// Name path to index under
        #[arg(long, default_value = "/")]
        prefix: String,
        /// Flush the session every N nodes (0 = only at the end)
        #[arg(long, default_value = "10000")]
        flush_every: usize,
    },
    /// Recompute dirty collection etags
    Resync {
        #[arg(default_value = "/")]
        path: String,
    },
    /// Look for orphans and duplicate names
    Check {
        /// Delete orphan subtrees
        #[arg(long)]
        fix: bool,
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Drop every index table
    Clean {
        /// Required confirmation
        #[arg(long)]
        yes: bool,
    },
}

/// CLI context holding the opened service.
pub struct CliContext {
    service: TreeService,
    config: IndexConfig,
}

impl CliContext {
    /// Load configuration and open the database.
    pub fn new(config_path: Option<PathBuf>, database: Option<PathBuf>) -> Result<Self, ApiError> {
        let mut config = match &config_path {
            Some(path) => ConfigLoader::load_from_file(path)?,
            None => ConfigLoader::load()?,
        };
        if let Some(db) = database {
            config.storage.database_path = Some(db);
        }
        let service = TreeService::open(&config, Arc::new(NoopPublisher))?;
        Ok(Self { service, config })
    }

    pub fn service(&self) -> &TreeService {
        &self.service
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Execute a CLI command
    pub fn execute(&self, command: &Commands) -> Result<String, ApiError> {
        match command {
            Commands::Mkdir { path } => {
                let node = self.service.create_node(
                    CreateNodeRequest::new(path.clone(), TreeNode::collection("")).update_if_exists(),
                )?;
                Ok(format!("{} {}", node.mpath, path))
            }
            Commands::Put {
                path,
                etag,
                size,
                update,
            } => {
                let mut req = CreateNodeRequest::new(path.clone(), TreeNode::leaf("", etag.clone(), *size));
                req.update_if_exists = *update;
                let node = self.service.create_node(req)?;
                Ok(format!("{} {} ({} bytes)", node.mpath, path, node.size))
            }
            Commands::Stat {
                path,
                etags,
                commits,
                format,
            } => self.handle_stat(path, *etags, *commits, format),
            Commands::Ls {
                path,
                recursive,
                etags,
                limit,
                format,
            } => {
                let nodes = self.service.list_nodes(ListNodesRequest {
                    path: path.clone(),
                    recursive: *recursive,
                    with_etags: *etags,
                    limit: *limit,
                    session: None,
                })?;
                format_nodes(&self.service, &nodes, format)
            }
            Commands::Mv { from, to } => {
                let moved = self.service.update_node(UpdateNodeRequest {
                    from: NodeRef::path(from.clone()),
                    to: to.clone(),
                    session: None,
                })?;
                Ok(format!("Moved {} to {} ({})", from, to, moved.mpath))
            }
            Commands::Rm { path } => {
                let removed = self.service.delete_node(DeleteNodeRequest {
                    node: NodeRef::path(path.clone()),
                    session: None,
                })?;
                Ok(format!("Removed {} node(s)", removed))
            }
            Commands::Log { path, format } => {
                let commits = self.service.list_commits(path)?;
                format_commits(&commits, format)
            }
            Commands::Index {
                dir,
                prefix,
                flush_every,
            } => {
                let summary = DirectoryIndexer::new(&self.service, prefix.clone())
                    .flush_every(*flush_every)
                    .run(dir)?;
                Ok(format!(
                    "Indexed {} collection(s), {} leaf(s), {} bytes in {} flush(es); skipped {}",
                    summary.collections,
                    summary.leaves,
                    summary.bytes,
                    summary.flushes,
                    summary.skipped
                ))
            }
            Commands::Resync { path } => {
                let changed = self.service.resync(path, None)?;
                Ok(format!("Recomputed {} etag(s) under {}", changed, path))
            }
            Commands::Check { fix, format } => self.handle_check(*fix, format),
            Commands::Clean { yes } => {
                if !yes {
                    return Err(ApiError::InvalidArgument(
                        "refusing to drop the index without --yes".to_string(),
                    ));
                }
                let message = self.service.clean_resources()?;
                info!(%message, "Index removed");
                Ok(message)
            }
        }
    }

    fn handle_stat(
        &self,
        path: &str,
        etags: bool,
        commits: bool,
        format: &str,
    ) -> Result<String, ApiError> {
        let response = self.service.read_node(ReadNodeRequest {
            node: NodeRef::path(path),
            with_etags: etags,
            with_commits: commits,
            session: None,
        })?;
        let counts = if response.node.is_collection() {
            Some(
                self.service
                    .store()
                    .get_node_children_counts(&response.node.mpath)?,
            )
        } else {
            None
        };
        if format == "json" {
            let value = json!({
                "path": response.path,
                "node": response.node,
                "children": counts,
                "commits": response.commits,
            });
            return to_pretty_json(&value);
        }

        let node = &response.node;
        let mut table = Table::new();
        table.load_preset(UTF8_BORDERS_ONLY);
        table.add_row(vec!["Path".to_string(), response.path.clone()]);
        table.add_row(vec!["UUID".to_string(), node.uuid.clone()]);
        table.add_row(vec!["MPath".to_string(), node.mpath.to_string()]);
        table.add_row(vec!["Type".to_string(), format!("{:?}", node.node_type)]);
        table.add_row(vec!["Etag".to_string(), node.etag.clone()]);
        table.add_row(vec!["Size".to_string(), node.size.to_string()]);
        table.add_row(vec!["MTime".to_string(), format_mtime(node.mtime)]);
        if let Some(counts) = counts {
            table.add_row(vec![
                "Children".to_string(),
                format!("{} collection(s), {} leaf(s)", counts.collections, counts.leaves),
            ]);
        }
        let mut out = table.to_string();
        if commits {
            out.push_str("\n\n");
            out.push_str(&format_commits(&response.commits, "text")?);
        }
        Ok(out)
    }

    fn handle_check(&self, fix: bool, format: &str) -> Result<String, ApiError> {
        let store = self.service.store().as_ref();
        let report = consistency::scan(store)?;
        let repaired = if fix && !report.orphans.is_empty() {
            Some(consistency::repair(store, store, &report)?)
        } else {
            None
        };

        if format == "json" {
            return to_pretty_json(&json!({
                "scanned": report.scanned,
                "clean": report.is_clean(),
                "orphans": report.orphans,
                "duplicates": report.duplicates,
                "repaired": repaired,
            }));
        }

        let mut out = format!("Scanned {} node(s)\n", report.scanned);
        if report.is_clean() {
            out.push_str("No inconsistencies found.\n");
            return Ok(out);
        }
        if !report.orphans.is_empty() {
            let mut table = Table::new();
            table.load_preset(UTF8_BORDERS_ONLY);
            table.set_header(vec!["Orphan", "MPath", "UUID"]);
            for orphan in &report.orphans {
                table.add_row(vec![
                    orphan.name.clone(),
                    orphan.mpath.to_string(),
                    orphan.uuid.clone(),
                ]);
            }
            out.push_str(&format!("{}\n", table));
        }
        for dup in &report.duplicates {
            out.push_str(&format!(
                "Duplicate name {:?} under {} ({} nodes)\n",
                dup.name,
                dup.parent,
                dup.nodes.len()
            ));
        }
        if let Some(removed) = repaired {
            out.push_str(&format!("Removed {} orphaned node(s)\n", removed));
        }
        Ok(out)
    }
}

fn to_pretty_json(value: &serde_json::Value) -> Result<String, ApiError> {
    serde_json::to_string_pretty(value).map_err(|e| ApiError::Internal(e.to_string()))
}

fn format_mtime(mtime: i64) -> String {
    chrono::DateTime::<chrono::Utc>::from_timestamp(mtime, 0)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| mtime.to_string())
}

fn format_nodes(service: &TreeService, nodes: &[TreeNode], format: &str) -> Result<String, ApiError> {
    if format == "json" {
        let arr = nodes
            .iter()
            .map(|n| -> Result<serde_json::Value, ApiError> {
                Ok(json!({
                    "path": service.node_path(n)?,
                    "node": n,
                }))
            })
            .collect::<Result<Vec<_>, _>>()?;
        return to_pretty_json(&serde_json::Value::Array(arr));
    }
    if nodes.is_empty() {
        return Ok("(empty)".to_string());
    }
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Path", "Type", "Size", "Etag", "MPath"]);
    for n in nodes {
        let etag: String = n.etag.chars().take(12).collect();
        table.add_row(vec![
            service.node_path(n)?,
            if n.is_leaf() { "leaf" } else { "collection" }.to_string(),
            n.size.to_string(),
            etag,
            n.mpath.to_string(),
        ]);
    }
    Ok(table.to_string())
}

fn format_commits(commits: &[CommitEntry], format: &str) -> Result<String, ApiError> {
    if format == "json" {
        return serde_json::to_string_pretty(commits).map_err(|e| ApiError::Internal(e.to_string()));
    }
    if commits.is_empty() {
        return Ok("No commits recorded.".to_string());
    }
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Version", "Size", "MTime"]);
    for c in commits {
        table.add_row(vec![c.uuid.clone(), c.size.to_string(), format_mtime(c.mtime)]);
    }
    Ok(table.to_string())
}
