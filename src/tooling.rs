//! Tooling & Integration Layer
//!
//! Command-line access to the index: path operations, bulk indexation of a
//! local directory through a session, etag resync and consistency checks.

pub mod cli;
pub mod indexer;

pub use cli::{Cli, CliContext, Commands};
pub use indexer::{DirectoryIndexer, IndexSummary};
