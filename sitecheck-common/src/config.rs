//! Configuration loading and data folder resolution
//!
//! Config file lookup follows this priority order:
//! 1. Command-line argument (highest priority)
//! 2. `SITECHECK_CONFIG` environment variable
//! 3. User config file (`~/.config/sitecheck/config.toml`), then `/etc/sitecheck/config.toml`
//! 4. Compiled defaults (fallback)
//!
//! A missing or unreadable config file never stops startup: a warning is logged
//! and compiled defaults are used instead.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "SITECHECK_CONFIG";

/// Logging section of the TOML config
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default log level when `RUST_LOG` is not set
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Result cache section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of cached pipeline results
    pub max_entries: usize,
    /// SQLite file for the persistent cache (defaults to `<data_dir>/result_cache.db`)
    pub path: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 20,
            path: None,
        }
    }
}

/// Job store section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct JobsConfig {
    /// Capacity of the in-process job store
    pub memory_capacity: usize,
    /// Connection URL for the durable job store. Absent = in-process store.
    pub database_url: Option<String>,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            memory_capacity: 100,
            database_url: None,
        }
    }
}

/// External reasoning service section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReasoningConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
    pub max_output_tokens: u32,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.anthropic.com".to_string(),
            model: "claude-sonnet-4-5".to_string(),
            timeout_secs: 180,
            max_output_tokens: 8192,
        }
    }
}

/// Complete TOML configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TomlConfig {
    /// Folder for local state (cache database, default job database)
    pub data_dir: Option<PathBuf>,
    /// HTTP bind address
    pub bind_address: Option<String>,
    pub logging: LoggingConfig,
    pub cache: CacheConfig,
    pub jobs: JobsConfig,
    pub reasoning: ReasoningConfig,
}

/// Locate the config file to load, if any
pub fn config_file_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Platform config locations
    let user_config = dirs::config_dir().map(|d| d.join("sitecheck").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    let system_config = PathBuf::from("/etc/sitecheck/config.toml");
    if cfg!(target_os = "linux") && system_config.exists() {
        return Some(system_config);
    }

    None
}

/// Parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
}

/// Load configuration, degrading to defaults when the file is missing or invalid
pub fn load_or_default(cli_arg: Option<&Path>) -> TomlConfig {
    match config_file_path(cli_arg) {
        Some(path) => match load_toml_config(&path) {
            Ok(config) => {
                info!("Configuration loaded from {}", path.display());
                config
            }
            Err(e) => {
                warn!("{} - using compiled defaults", e);
                TomlConfig::default()
            }
        },
        None => {
            info!("No config file found - using compiled defaults");
            TomlConfig::default()
        }
    }
}

/// Write a config file (used by tests and the `--write-default-config` flag)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize config failed: {}", e)))?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Get OS-dependent default data folder
pub fn default_data_dir() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/sitecheck (or /var/lib/sitecheck for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join("sitecheck"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/sitecheck"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("sitecheck"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/sitecheck"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("sitecheck"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\sitecheck"))
    } else {
        PathBuf::from("./sitecheck_data")
    }
}
