//! Integration tests for configuration loading and root folder resolution

use polish_common::config::{load_toml_config, resolve_root_folder, LoggingConfig};
use serde::Deserialize;
use serial_test::serial;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SampleConfig {
    root_folder: Option<PathBuf>,
    logging: LoggingConfig,
    worker_pool_size: Option<usize>,
}

#[test]
fn test_load_explicit_toml_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("sample.toml");
    std::fs::write(
        &path,
        r#"
root_folder = "/srv/polish"
worker_pool_size = 8

[logging]
level = "debug"
"#,
    )
    .unwrap();

    let config: SampleConfig = load_toml_config(Some(&path), "sample").unwrap();
    assert_eq!(config.root_folder, Some(PathBuf::from("/srv/polish")));
    assert_eq!(config.worker_pool_size, Some(8));
    assert_eq!(config.logging.level, "debug");
}

#[test]
fn test_missing_explicit_file_is_config_error() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("absent.toml");

    let result: polish_common::Result<SampleConfig> = load_toml_config(Some(&path), "sample");
    assert!(matches!(result, Err(polish_common::Error::Config(_))));
}

#[test]
fn test_malformed_file_is_config_error() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("broken.toml");
    std::fs::write(&path, "worker_pool_size = [").unwrap();

    let result: polish_common::Result<SampleConfig> = load_toml_config(Some(&path), "sample");
    assert!(matches!(result, Err(polish_common::Error::Config(_))));
}

#[test]
#[serial]
fn test_env_var_beats_toml_root() {
    std::env::set_var("POLISH_TEST_ROOT_FOLDER", "/from/env");
    let resolved = resolve_root_folder(
        None,
        "POLISH_TEST_ROOT_FOLDER",
        Some(Path::new("/from/toml")),
    );
    std::env::remove_var("POLISH_TEST_ROOT_FOLDER");

    assert_eq!(resolved, PathBuf::from("/from/env"));
}

#[test]
#[serial]
fn test_default_root_used_as_last_resort() {
    std::env::remove_var("POLISH_TEST_ROOT_FOLDER");
    let resolved = resolve_root_folder(None, "POLISH_TEST_ROOT_FOLDER", None);
    assert!(resolved.ends_with("polish") || resolved.ends_with("polish_data"));
}
