//! Unit tests for configuration loading and graceful degradation
//!
//! Note: Uses serial_test crate to prevent ENV variable race conditions.
//! Tests that manipulate SITECHECK_CONFIG are marked with #[serial].

use serial_test::serial;
use sitecheck_common::config::{
    config_file_path, load_or_default, load_toml_config, write_toml_config, TomlConfig,
    CONFIG_ENV_VAR,
};
use std::env;
use tempfile::TempDir;

#[test]
fn test_defaults_when_sections_missing() {
    let config: TomlConfig = toml::from_str("bind_address = \"0.0.0.0:9000\"").unwrap();

    assert_eq!(config.bind_address.as_deref(), Some("0.0.0.0:9000"));
    assert_eq!(config.cache.max_entries, 20);
    assert_eq!(config.jobs.memory_capacity, 100);
    assert!(config.jobs.database_url.is_none());
    assert_eq!(config.logging.level, "info");
}

#[test]
fn test_nested_sections_parse() {
    let toml_str = r#"
        [jobs]
        database_url = "sqlite://jobs.db?mode=rwc"
        memory_capacity = 5

        [reasoning]
        api_key = "sk-test"
        model = "test-model"
    "#;
    let config: TomlConfig = toml::from_str(toml_str).unwrap();

    assert_eq!(config.jobs.database_url.as_deref(), Some("sqlite://jobs.db?mode=rwc"));
    assert_eq!(config.jobs.memory_capacity, 5);
    assert_eq!(config.reasoning.api_key.as_deref(), Some("sk-test"));
    assert_eq!(config.reasoning.model, "test-model");
    // Unspecified fields keep defaults
    assert_eq!(config.reasoning.timeout_secs, 180);
}

#[test]
fn test_write_then_load() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("nested").join("config.toml");

    let mut config = TomlConfig::default();
    config.cache.max_entries = 7;
    config.bind_address = Some("127.0.0.1:1234".to_string());
    write_toml_config(&config, &path).unwrap();

    let loaded = load_toml_config(&path).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn test_invalid_toml_is_config_error() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("broken.toml");
    std::fs::write(&path, "this is = = not toml").unwrap();

    let err = load_toml_config(&path).unwrap_err();
    assert!(err.to_string().contains("Configuration error"));
}

#[test]
#[serial]
fn test_cli_arg_beats_env_var() {
    env::set_var(CONFIG_ENV_VAR, "/tmp/from-env.toml");

    let cli = std::path::PathBuf::from("/tmp/from-cli.toml");
    assert_eq!(config_file_path(Some(&cli)), Some(cli.clone()));
    assert_eq!(
        config_file_path(None),
        Some(std::path::PathBuf::from("/tmp/from-env.toml"))
    );

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_missing_file_degrades_to_defaults() {
    env::remove_var(CONFIG_ENV_VAR);
    let temp_dir = TempDir::new().unwrap();
    let missing = temp_dir.path().join("does-not-exist.toml");

    let config = load_or_default(Some(&missing));
    assert_eq!(config, TomlConfig::default());
}
