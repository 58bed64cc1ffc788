//! StorageConfig and database path resolution.

use super::paths;
use crate::error::{ApiError, StorageError};
use crate::mpath::MPathLayout;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

fn default_table_prefix() -> String {
    "idx_".to_string()
}

fn default_mpath_columns() -> usize {
    4
}

fn default_mpath_column_len() -> usize {
    255
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database file; None means the platform data directory.
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Prefix of every table name.
    #[serde(default = "default_table_prefix")]
    pub table_prefix: String,

    /// Number of `mpathN` columns.
    #[serde(default = "default_mpath_columns")]
    pub mpath_columns: usize,

    /// Byte length of each `mpathN` column.
    #[serde(default = "default_mpath_column_len")]
    pub mpath_column_len: usize,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl StorageConfig {
    pub fn layout(&self) -> Result<MPathLayout, StorageError> {
        MPathLayout::new(self.mpath_columns, self.mpath_column_len)
    }

    /// Resolve the database file location.
    pub fn resolve_database_path(&self) -> Result<PathBuf, ApiError> {
        match &self.database_path {
            Some(p) if !p.as_os_str().is_empty() => Ok(p.clone()),
            _ => Ok(paths::data_dir()?.join("index.sqlite")),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            table_prefix: default_table_prefix(),
            mpath_columns: default_mpath_columns(),
            mpath_column_len: default_mpath_column_len(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}
