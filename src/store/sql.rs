//! SQLite connection capability.
//!
//! A single connection guarded by a mutex. The guard is held for one statement,
//! or for one explicit transaction, never across a higher-level operation.

use crate::config::StorageConfig;
use crate::error::StorageError;
use crate::mpath::MPathLayout;
use parking_lot::{Mutex, MutexGuard};
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Connection and schema access for relational tree stores.
pub trait Connector: Send + Sync {
    /// Exclusive access to the connection for one statement or transaction.
    fn lock(&self) -> MutexGuard<'_, Connection>;

    /// Column geometry of the materialized path.
    fn layout(&self) -> MPathLayout;

    /// Fully qualified table name for `name`.
    fn table(&self, name: &str) -> String;
}

pub const NODES_TABLE: &str = "tree";
pub const COMMITS_TABLE: &str = "commits";

/// SQLite-backed connector.
pub struct SqliteConnector {
    conn: Mutex<Connection>,
    layout: MPathLayout,
    prefix: String,
}

impl SqliteConnector {
    /// Open (or create) the database file described by `config`.
    pub fn open(path: &Path, config: &StorageConfig) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        info!(path = %path.display(), "Opened tree index database");
        Self::with_connection(conn, config)
    }

    /// Private in-memory database, mostly for tests.
    pub fn open_in_memory(config: &StorageConfig) -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn, config)
    }

    fn with_connection(conn: Connection, config: &StorageConfig) -> Result<Self, StorageError> {
        validate_prefix(&config.table_prefix)?;
        let layout = config.layout()?;
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
        let connector = Self {
            conn: Mutex::new(conn),
            layout,
            prefix: config.table_prefix.clone(),
        };
        connector.create_schema()?;
        Ok(connector)
    }

    fn create_schema(&self) -> Result<(), StorageError> {
        let nodes = self.table(NODES_TABLE);
        let commits = self.table(COMMITS_TABLE);
        let mpath_defs = self
            .layout
            .column_names()
            .iter()
            .map(|c| format!("{} TEXT NOT NULL DEFAULT ''", c))
            .collect::<Vec<_>>()
            .join(",\n                ");
        let mpath_index = self.layout.column_names().join(", ");
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {nodes} (
                uuid TEXT PRIMARY KEY,
                hash TEXT NOT NULL UNIQUE,
                level INTEGER NOT NULL,
                name TEXT NOT NULL,
                leaf INTEGER NOT NULL,
                etag TEXT NOT NULL,
                size INTEGER NOT NULL DEFAULT 0,
                mtime INTEGER NOT NULL DEFAULT 0,
                mode INTEGER NOT NULL DEFAULT 0,
                {mpath_defs}
            );
            CREATE INDEX IF NOT EXISTS {nodes}_mpath ON {nodes}({mpath_index}, level);
            CREATE INDEX IF NOT EXISTS {nodes}_name ON {nodes}(name);
            CREATE INDEX IF NOT EXISTS {nodes}_dirty ON {nodes}(level) WHERE leaf = 0 AND etag = '-1';
            CREATE TABLE IF NOT EXISTS {commits} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                uuid TEXT NOT NULL,
                etag TEXT NOT NULL,
                mtime INTEGER NOT NULL,
                size INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS {commits}_uuid ON {commits}(uuid, id);"
        );
        let conn = self.lock();
        conn.execute_batch(&ddl)?;

        // An existing table must have been created with the same geometry.
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", nodes))?;
        let existing = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .filter_map(|r| r.ok())
            .filter(|c| c.starts_with("mpath"))
            .count();
        if existing != self.layout.columns() {
            return Err(StorageError::Internal(format!(
                "table {} has {} mpath columns, configuration expects {}",
                nodes,
                existing,
                self.layout.columns()
            )));
        }
        debug!(table = %nodes, columns = existing, "Schema ready");
        Ok(())
    }
}

impl Connector for SqliteConnector {
    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    fn layout(&self) -> MPathLayout {
        self.layout
    }

    fn table(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }
}

fn validate_prefix(prefix: &str) -> Result<(), StorageError> {
    if prefix
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        Ok(())
    } else {
        Err(StorageError::InvalidArgument(format!(
            "table prefix {:?} may only contain ASCII letters, digits and '_'",
            prefix
        )))
    }
}
