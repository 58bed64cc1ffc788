//! MergeService: orchestrates sources, applies merge policy, deserializes to IndexConfig.

use crate::config::sources::{with_environment, with_global_file};
use crate::config::IndexConfig;
use config::{ConfigError, File};
use std::path::Path;

use super::merge_policy;

/// Merge service for config composition.
pub struct MergeService;

impl MergeService {
    /// Precedence: defaults (lowest) -> global file -> explicit file -> environment (highest).
    pub fn load(explicit: Option<&Path>) -> Result<IndexConfig, ConfigError> {
        let builder = merge_policy::builder_with_defaults()?;
        let builder = with_global_file(builder)?;
        let builder = match explicit {
            Some(path) => builder.add_source(File::from(path).required(true)),
            None => builder,
        };
        let builder = with_environment(builder)?;

        let config = builder.build()?;
        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_explicit_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("treeindex.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[storage]\nmpath_columns = 6\ntable_prefix = \"t_\"\n\n[session]\ninsert_buffer = 10"
        )
        .unwrap();

        let config = MergeService::load(Some(&path)).unwrap();
        assert_eq!(config.storage.mpath_columns, 6);
        assert_eq!(config.storage.mpath_column_len, 255);
        assert_eq!(config.storage.table_prefix, "t_");
        assert_eq!(config.session.insert_buffer, 10);
        assert_eq!(config.session.conflict_retries, 3);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(MergeService::load(Some(&dir.path().join("absent.toml"))).is_err());
    }
}
