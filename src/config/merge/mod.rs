//! Merge policy and service for configuration sources.

pub mod service;

pub(crate) mod merge_policy {
    use config::builder::DefaultState;
    use config::{ConfigBuilder, ConfigError};

    /// Builder seeded with the built-in defaults, the lowest precedence layer.
    pub fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        config::Config::builder()
            .set_default("storage.table_prefix", "idx_")?
            .set_default("storage.mpath_columns", 4)?
            .set_default("storage.mpath_column_len", 255)?
            .set_default("storage.busy_timeout_ms", 5000)?
            .set_default("session.insert_buffer", 1000)?
            .set_default("session.conflict_retries", 3)
    }
}
