//! Platform directories for configuration, data and state.

use crate::error::ApiError;
use directories::ProjectDirs;
use std::path::PathBuf;

fn project_dirs() -> Result<ProjectDirs, ApiError> {
    ProjectDirs::from("", "", "treeindex").ok_or_else(|| {
        ApiError::ConfigError("Could not determine platform directories (HOME not set)".to_string())
    })
}

/// Directory holding the default database.
///
/// `TREEINDEX_DATA_DIR` overrides the platform default.
pub fn data_dir() -> Result<PathBuf, ApiError> {
    if let Ok(dir) = std::env::var("TREEINDEX_DATA_DIR") {
        if !dir.is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }
    Ok(project_dirs()?.data_dir().to_path_buf())
}

/// Global configuration file, `<config dir>/treeindex/config.toml`.
pub fn global_config_file() -> Option<PathBuf> {
    project_dirs()
        .ok()
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Directory for the default log file.
pub fn state_dir() -> Result<PathBuf, ApiError> {
    let dirs = project_dirs()?;
    Ok(dirs
        .state_dir()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| dirs.data_local_dir().to_path_buf()))
}
