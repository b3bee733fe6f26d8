//! Resolved runtime settings
//!
//! TOML values (see [`sitecheck_common::config`]) overlaid with environment
//! variables. Environment wins over the file; the file wins over defaults.

use sitecheck_common::config::{default_data_dir, ReasoningConfig, TomlConfig};
use std::path::PathBuf;

pub const ENV_DATABASE_URL: &str = "SITECHECK_DATABASE_URL";
pub const ENV_DATA_DIR: &str = "SITECHECK_DATA_DIR";
pub const ENV_BIND: &str = "SITECHECK_BIND";
pub const ENV_REASONING_API_KEY: &str = "SITECHECK_REASONING_API_KEY";
pub const ENV_REASONING_BASE_URL: &str = "SITECHECK_REASONING_BASE_URL";
pub const ENV_REASONING_MODEL: &str = "SITECHECK_REASONING_MODEL";
pub const ENV_CACHE_MAX_ENTRIES: &str = "SITECHECK_CACHE_MAX_ENTRIES";
pub const ENV_JOB_CAPACITY: &str = "SITECHECK_JOB_CAPACITY";

pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:5740";

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub bind_address: String,
    pub data_dir: PathBuf,
    /// Durable job store URL; `None` selects the in-process store
    pub database_url: Option<String>,
    pub job_capacity: usize,
    pub cache_path: PathBuf,
    pub cache_max_entries: usize,
    pub log_level: String,
    pub reasoning: ReasoningConfig,
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_number(name: &str) -> Option<usize> {
    let raw = env_string(name)?;
    match raw.parse() {
        Ok(n) => Some(n),
        Err(_) => {
            tracing::warn!("Ignoring {}={}: not a number", name, raw);
            None
        }
    }
}

impl PipelineSettings {
    /// Overlay environment variables on the TOML configuration
    pub fn resolve(toml: &TomlConfig) -> Self {
        let data_dir = env_string(ENV_DATA_DIR)
            .map(PathBuf::from)
            .or_else(|| toml.data_dir.clone())
            .unwrap_or_else(default_data_dir);

        let mut reasoning = toml.reasoning.clone();
        if let Some(key) = env_string(ENV_REASONING_API_KEY) {
            reasoning.api_key = Some(key);
        }
        if let Some(url) = env_string(ENV_REASONING_BASE_URL) {
            reasoning.base_url = url;
        }
        if let Some(model) = env_string(ENV_REASONING_MODEL) {
            reasoning.model = model;
        }
        reasoning.api_key = reasoning.api_key.filter(|k| !k.trim().is_empty());

        Self {
            bind_address: env_string(ENV_BIND)
                .or_else(|| toml.bind_address.clone())
                .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string()),
            database_url: env_string(ENV_DATABASE_URL)
                .or_else(|| toml.jobs.database_url.clone())
                .filter(|url| !url.trim().is_empty()),
            job_capacity: env_number(ENV_JOB_CAPACITY).unwrap_or(toml.jobs.memory_capacity),
            cache_path: toml
                .cache
                .path
                .clone()
                .unwrap_or_else(|| data_dir.join("result_cache.db")),
            cache_max_entries: env_number(ENV_CACHE_MAX_ENTRIES)
                .unwrap_or(toml.cache.max_entries),
            log_level: toml.logging.level.clone(),
            reasoning,
            data_dir,
        }
    }

    pub fn reasoning_enabled(&self) -> bool {
        self.reasoning.api_key.is_some()
    }
}
