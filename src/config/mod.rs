//! Configuration
//!
//! Layered configuration for the tree index: built-in defaults, then the global
//! config file, then an explicit file, then `TREEINDEX__*` environment variables.

mod facade;
pub mod merge;
pub mod paths;
pub mod sources;
mod storage;

pub use facade::ConfigLoader;
pub use storage::StorageConfig;

use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};

/// Bulk session tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Capacity of the bounded insert queue of a session.
    #[serde(default = "default_insert_buffer")]
    pub insert_buffer: usize,

    /// How many times the service re-resolves a path after losing a create race.
    #[serde(default = "default_conflict_retries")]
    pub conflict_retries: usize,
}

fn default_insert_buffer() -> usize {
    1000
}

fn default_conflict_retries() -> usize {
    3
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            insert_buffer: default_insert_buffer(),
            conflict_retries: default_conflict_retries(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexConfig {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}
