//! Error types for the tree index.
//!
//! `StorageError` is raised by the codec, the relational store and the session
//! layer. `ApiError` is what the service façade, the CLI and the configuration
//! loader surface to callers.

use thiserror::Error;

/// Errors raised below the service boundary.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already in use: {0}")]
    Conflict(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("materialized path codec error: {0}")]
    Codec(String),

    /// Combined failures collected by an asynchronous insert queue.
    #[error("{} insert(s) failed during flush: {}", .0.len(), .0.join("; "))]
    Batch(Vec<String>),

    #[error("sqlite error: {0}")]
    Sqlite(rusqlite::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::Conflict(_))
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, msg)
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StorageError::Conflict(msg.clone().unwrap_or_else(|| e.to_string()))
            }
            rusqlite::Error::QueryReturnedNoRows => {
                StorageError::NotFound("query returned no rows".to_string())
            }
            _ => StorageError::Sqlite(err),
        }
    }
}

/// Errors surfaced by the service façade, the CLI and configuration loading.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already in use: {0}")]
    Conflict(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl ApiError {
    /// HTTP-equivalent status code for the external façade.
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::NotFound(_) => 404,
            ApiError::Conflict(_) => 409,
            ApiError::InvalidArgument(_) => 400,
            ApiError::Internal(_) | ApiError::ConfigError(_) | ApiError::Config(_) => 500,
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(msg) => ApiError::NotFound(msg),
            StorageError::Conflict(msg) => ApiError::Conflict(msg),
            StorageError::InvalidArgument(msg) => ApiError::InvalidArgument(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_errors_map_to_api_taxonomy() {
        let err: ApiError = StorageError::NotFound("/a".into()).into();
        assert_eq!(err.status_code(), 404);

        let err: ApiError = StorageError::Conflict("/a".into()).into();
        assert_eq!(err.status_code(), 409);
        assert!(err.to_string().contains("already in use"));

        let err: ApiError = StorageError::Batch(vec!["x".into(), "y".into()]).into();
        assert_eq!(err.status_code(), 500);
        assert!(err.to_string().contains("2 insert(s) failed"));
    }

    #[test]
    fn test_constraint_violation_is_conflict() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (k TEXT PRIMARY KEY); INSERT INTO t VALUES ('a');")
            .unwrap();
        let err: StorageError = conn
            .execute("INSERT INTO t VALUES ('a')", [])
            .unwrap_err()
            .into();
        assert!(err.is_conflict());
    }
}
