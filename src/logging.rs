//! Logging System
//!
//! Structured logging with the `tracing` crate. Level, format and destination
//! come from the `[logging]` config section and can be overridden with
//! `TREEINDEX_LOG*` environment variables.

use crate::config::paths;
use crate::error::ApiError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Resolve the log file path with precedence: CLI, TREEINDEX_LOG_FILE env, config file, default.
pub fn resolve_log_file_path(
    cli_file: Option<PathBuf>,
    config_file: Option<PathBuf>,
) -> Result<PathBuf, ApiError> {
    if let Some(p) = cli_file.filter(|p| !p.as_os_str().is_empty()) {
        return Ok(p);
    }
    if let Ok(env_path) = std::env::var("TREEINDEX_LOG_FILE") {
        if !env_path.is_empty() {
            return Ok(PathBuf::from(env_path));
        }
    }
    if let Some(p) = config_file.filter(|p| !p.as_os_str().is_empty()) {
        return Ok(p);
    }
    Ok(paths::state_dir()?.join("treeindex.log"))
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Whether logging is enabled (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Log level: trace, debug, info, warn, error, off
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: json, text (default: text)
    #[serde(default = "default_format")]
    pub format: String,

    /// Output destination: stdout, stderr, file, file+stderr, both
    #[serde(default = "default_output")]
    pub output: String,

    /// Log file path when output includes file; None means use runtime default
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// Enable colored output (text format only, stdout/stderr only)
    #[serde(default = "default_true")]
    pub color: bool,

    /// Module-specific log levels
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_format() -> String {
    "text".to_string()
}

fn default_output() -> String {
    "stderr".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            level: default_log_level(),
            format: default_format(),
            output: default_output(),
            file: None,
            color: default_true(),
            modules: HashMap::new(),
        }
    }
}

/// Initialize the global subscriber.
///
/// Priority order (highest to lowest): environment variables, configuration, defaults.
/// Calling it twice is harmless; the second subscriber is discarded.
pub fn init_logging(config: Option<&LoggingConfig>) -> Result<(), ApiError> {
    if config.map(|c| !c.enabled).unwrap_or(false) {
        let _ = Registry::default()
            .with(EnvFilter::new("off"))
            .with(fmt::layer().with_writer(std::io::sink))
            .try_init();
        return Ok(());
    }

    let filter = build_env_filter(config)?;
    let format = determine_format(config)?;
    let output = determine_output(config)?;
    let use_color = config.map(|c| c.color).unwrap_or(true) && !output.file;

    let writer = match (output.file, output.stdout, output.stderr) {
        (true, _, true) => BoxMakeWriter::new(open_log_file(config)?.and(std::io::stderr)),
        (true, _, false) => BoxMakeWriter::new(open_log_file(config)?),
        (false, true, true) => BoxMakeWriter::new(std::io::stdout.and(std::io::stderr)),
        (false, true, false) => BoxMakeWriter::new(std::io::stdout),
        (false, false, _) => BoxMakeWriter::new(std::io::stderr),
    };

    let base = Registry::default().with(filter);
    let layer = fmt::layer()
        .with_target(true)
        .with_timer(ChronoUtc::rfc_3339())
        .with_writer(writer);
    let result = if format == "json" {
        base.with(layer.json()).try_init()
    } else {
        base.with(layer.with_ansi(use_color)).try_init()
    };
    if result.is_err() {
        tracing::debug!("Global subscriber already installed");
    }
    Ok(())
}

fn open_log_file(config: Option<&LoggingConfig>) -> Result<std::fs::File, ApiError> {
    let path = resolve_log_file_path(None, config.and_then(|c| c.file.clone()))?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ApiError::ConfigError(format!("Failed to create log directory: {}", e)))?;
    }
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| ApiError::ConfigError(format!("Failed to open log file {:?}: {}", path, e)))
}

/// Build environment filter from config or environment variables
fn build_env_filter(config: Option<&LoggingConfig>) -> Result<EnvFilter, ApiError> {
    if let Ok(filter) = EnvFilter::try_from_env("TREEINDEX_LOG") {
        return Ok(filter);
    }

    let level = config.map(|c| c.level.as_str()).unwrap_or("info");
    if level == "off" {
        return Ok(EnvFilter::new("off"));
    }

    let mut filter = EnvFilter::new(level);
    let mut directives: Vec<String> = config
        .map(|c| {
            c.modules
                .iter()
                .map(|(module, lvl)| format!("{}={}", module, lvl))
                .collect()
        })
        .unwrap_or_default();
    if let Ok(modules) = std::env::var("TREEINDEX_LOG_MODULES") {
        directives.extend(modules.split(',').filter_map(|spec| {
            let (module, lvl) = spec.split_once('=')?;
            Some(format!("{}={}", module.trim(), lvl.trim()))
        }));
    }
    for directive in directives {
        filter = filter.add_directive(
            directive
                .parse()
                .map_err(|e| ApiError::ConfigError(format!("Invalid log directive: {}", e)))?,
        );
    }
    Ok(filter)
}

/// Determine output format from config or environment
fn determine_format(config: Option<&LoggingConfig>) -> Result<String, ApiError> {
    if let Ok(format) = std::env::var("TREEINDEX_LOG_FORMAT") {
        if format == "json" || format == "text" {
            return Ok(format);
        }
    }

    let format = config.map(|c| c.format.as_str()).unwrap_or("text");
    if format != "json" && format != "text" {
        return Err(ApiError::ConfigError(format!(
            "Invalid log format: {} (must be 'json' or 'text')",
            format
        )));
    }
    Ok(format.to_string())
}

/// Output destinations
#[derive(Debug, PartialEq, Eq)]
struct OutputDestinations {
    stdout: bool,
    stderr: bool,
    file: bool,
}

fn determine_output(config: Option<&LoggingConfig>) -> Result<OutputDestinations, ApiError> {
    if let Ok(output) = std::env::var("TREEINDEX_LOG_OUTPUT") {
        return parse_output_destinations(&output);
    }
    parse_output_destinations(config.map(|c| c.output.as_str()).unwrap_or("stderr"))
}

fn parse_output_destinations(output: &str) -> Result<OutputDestinations, ApiError> {
    let (stdout, stderr, file) = match output {
        "stdout" => (true, false, false),
        "stderr" => (false, true, false),
        "file" => (false, false, true),
        "file+stderr" => (false, true, true),
        "both" => (true, true, false),
        _ => {
            return Err(ApiError::ConfigError(format!(
                "Invalid log output: {} (must be 'stdout', 'stderr', 'file', 'file+stderr', or 'both')",
                output
            )))
        }
    };
    Ok(OutputDestinations {
        stdout,
        stderr,
        file,
    })
}
