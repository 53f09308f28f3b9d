//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/casegraph/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/casegraph/` (~/.config/casegraph/)
//! - Data: `$XDG_DATA_HOME/casegraph/` (~/.local/share/casegraph/)
//! - State/Logs: `$XDG_STATE_HOME/casegraph/` (~/.local/state/casegraph/)

use crate::active::WindowFilter;
use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Where derived tables are written
    #[serde(default)]
    pub output: OutputConfig,

    /// Prefix extraction settings
    #[serde(default)]
    pub prefix: PrefixConfig,

    /// Active-case query settings
    #[serde(default)]
    pub query: QueryConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Output file configuration
#[derive(Debug, Deserialize)]
pub struct OutputConfig {
    /// Output directory (defaults to `$XDG_DATA_HOME/casegraph/output`)
    pub dir: Option<PathBuf>,

    /// Prefix table file name
    #[serde(default = "default_prefix_file")]
    pub prefix_file: String,

    /// Reconciled timeline file name
    #[serde(default = "default_timeline_file")]
    pub timeline_file: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: None,
            prefix_file: default_prefix_file(),
            timeline_file: default_timeline_file(),
        }
    }
}

impl OutputConfig {
    /// Resolved output directory
    pub fn dir(&self) -> PathBuf {
        self.dir
            .clone()
            .unwrap_or_else(|| Config::data_dir().join("output"))
    }

    pub fn prefix_path(&self) -> PathBuf {
        self.dir().join(&self.prefix_file)
    }

    pub fn timeline_path(&self) -> PathBuf {
        self.dir().join(&self.timeline_file)
    }
}

fn default_prefix_file() -> String {
    "prefixes.csv".to_string()
}

fn default_timeline_file() -> String {
    "timeline.csv".to_string()
}

/// Prefix extraction configuration
#[derive(Debug, Deserialize, Default)]
pub struct PrefixConfig {
    /// Longest prefix to emit; unlimited when absent
    pub max_length: Option<u32>,
}

/// Active-case query configuration
#[derive(Debug, Deserialize, Default)]
pub struct QueryConfig {
    /// How timeline rows are matched against the query window
    #[serde(default)]
    pub window_filter: WindowFilter,
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.prefix.max_length == Some(0) {
            return Err(Error::Config(
                "prefix.max_length must be at least 1".to_string(),
            ));
        }
        if self.output.prefix_file.trim().is_empty() {
            return Err(Error::Config(
                "output.prefix_file must not be empty".to_string(),
            ));
        }
        if self.output.timeline_file.trim().is_empty() {
            return Err(Error::Config(
                "output.timeline_file must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/casegraph/config.toml` (~/.config/casegraph/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("casegraph").join("config.toml")
    }

    /// Returns the data directory path (for SQLite database)
    ///
    /// `$XDG_DATA_HOME/casegraph/` (~/.local/share/casegraph/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("casegraph")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/casegraph/` (~/.local/state/casegraph/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("casegraph")
    }

    /// Returns the database file path
    ///
    /// `$XDG_DATA_HOME/casegraph/casegraph.db`
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("casegraph.db")
    }
}
