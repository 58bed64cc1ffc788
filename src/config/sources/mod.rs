//! Configuration sources layered by the merge service.
//!
//! The global file lives in the platform config directory; environment
//! variables use the `TREEINDEX__` prefix with `__` between nested keys, e.g.
//! `TREEINDEX__STORAGE__MPATH_COLUMNS=6`.

use crate::config::paths;
use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError, Environment, File};

pub const ENV_PREFIX: &str = "TREEINDEX";

type Builder = ConfigBuilder<DefaultState>;

/// Layer the global config file when one exists.
pub fn with_global_file(builder: Builder) -> Result<Builder, ConfigError> {
    match paths::global_config_file() {
        Some(path) if path.exists() => Ok(builder.add_source(File::from(path).required(false))),
        _ => Ok(builder),
    }
}

/// Layer `TREEINDEX__*` variables over everything else.
pub fn with_environment(builder: Builder) -> Result<Builder, ConfigError> {
    Ok(builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    ))
}
