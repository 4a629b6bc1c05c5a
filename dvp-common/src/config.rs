//! Configuration loading and resolution
//!
//! Every setting is resolved in priority order:
//! 1. Command-line argument (highest priority; clap also folds in the
//!    matching environment variable)
//! 2. TOML config file
//! 3. Compiled default (fallback)
//!
//! A missing or unreadable TOML file never aborts startup: callers log a
//! warning and fall back to the compiled defaults.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "DVP_CONFIG";

/// Rows per upsert batch when nothing else is configured
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Raw row cadence for checkpoint updates when nothing else is configured
pub const DEFAULT_CHECKPOINT_INTERVAL: u64 = 500;

/// Maximum time to retry a locked SQLite write
pub const DEFAULT_MAX_LOCK_WAIT_MS: u64 = 5000;

/// OS-dependent compiled defaults
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub data_dir: PathBuf,
    pub database_path: PathBuf,
    pub batch_size: usize,
    pub checkpoint_interval: u64,
    pub max_lock_wait_ms: u64,
    pub log_level: String,
}

impl CompiledDefaults {
    pub fn for_current_platform() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            database_path: default_database_path(),
            batch_size: DEFAULT_BATCH_SIZE,
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            max_lock_wait_ms: DEFAULT_MAX_LOCK_WAIT_MS,
            log_level: "info".to_string(),
        }
    }
}

/// Contents of the optional `config.toml`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    /// Directory holding the dated CSV snapshots
    pub data_dir: Option<PathBuf>,
    /// SQLite database file
    pub database_path: Option<PathBuf>,
    pub batch_size: Option<usize>,
    pub checkpoint_interval: Option<u64>,
    pub max_lock_wait_ms: Option<u64>,
    /// tracing filter directive used when RUST_LOG is unset
    pub log_level: Option<String>,
}

impl TomlConfig {
    /// Parse a config file, failing on I/O or syntax errors
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Invalid TOML in {}: {}", path.display(), e)))
    }
}

/// Settings supplied on the command line (or their environment variables)
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub data_dir: Option<PathBuf>,
    pub database_path: Option<PathBuf>,
    pub batch_size: Option<usize>,
    pub checkpoint_interval: Option<u64>,
}

/// Fully resolved importer configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportConfig {
    pub data_dir: PathBuf,
    pub database_path: PathBuf,
    pub batch_size: usize,
    pub checkpoint_interval: u64,
    pub max_lock_wait_ms: u64,
    pub log_level: String,
}

impl ImportConfig {
    /// Merge overrides, TOML and defaults, then validate the result
    pub fn resolve(
        overrides: &ConfigOverrides,
        toml_config: &TomlConfig,
        defaults: &CompiledDefaults,
    ) -> Result<Self> {
        let config = Self {
            data_dir: overrides
                .data_dir
                .clone()
                .or_else(|| toml_config.data_dir.clone())
                .unwrap_or_else(|| defaults.data_dir.clone()),
            database_path: overrides
                .database_path
                .clone()
                .or_else(|| toml_config.database_path.clone())
                .unwrap_or_else(|| defaults.database_path.clone()),
            batch_size: overrides
                .batch_size
                .or(toml_config.batch_size)
                .unwrap_or(defaults.batch_size),
            checkpoint_interval: overrides
                .checkpoint_interval
                .or(toml_config.checkpoint_interval)
                .unwrap_or(defaults.checkpoint_interval),
            max_lock_wait_ms: toml_config
                .max_lock_wait_ms
                .unwrap_or(defaults.max_lock_wait_ms),
            log_level: toml_config
                .log_level
                .clone()
                .unwrap_or_else(|| defaults.log_level.clone()),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be greater than 0".to_string()));
        }
        if self.checkpoint_interval == 0 {
            return Err(Error::Config(
                "checkpoint_interval must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Locate the config file: explicit argument, then `DVP_CONFIG`, then the
/// platform config directory (only if the file exists there)
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    dirs::config_dir()
        .map(|d| d.join("dvp").join("config.toml"))
        .filter(|p| p.exists())
}

/// Get OS-dependent default database path
fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("dvp").join("dvp.db"))
        .unwrap_or_else(|| PathBuf::from("./dvp_data/dvp.db"))
}
