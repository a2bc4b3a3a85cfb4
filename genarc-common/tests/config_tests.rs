//! Tests for config file loading and root folder resolution
//!
//! Uses serial_test to prevent environment variable races: tests that set or clear
//! GENARC_ROOT are marked #[serial].

use genarc_common::config::{
    default_root_folder, resolve_root_folder, IngestConfig, ROOT_ENV_VAR,
};
use genarc_common::Error;
use serial_test::serial;
use std::env;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

#[test]
#[serial]
fn test_cli_argument_has_highest_priority() {
    env::set_var(ROOT_ENV_VAR, "/tmp/genarc-env");
    let config = IngestConfig {
        root_folder: Some(PathBuf::from("/tmp/genarc-toml")),
        ..Default::default()
    };

    let root = resolve_root_folder(Some("/tmp/genarc-cli"), &config);

    assert_eq!(root, PathBuf::from("/tmp/genarc-cli"));
    env::remove_var(ROOT_ENV_VAR);
}

#[test]
#[serial]
fn test_env_var_beats_config_file() {
    env::set_var(ROOT_ENV_VAR, "/tmp/genarc-env");
    let config = IngestConfig {
        root_folder: Some(PathBuf::from("/tmp/genarc-toml")),
        ..Default::default()
    };

    let root = resolve_root_folder(None, &config);

    assert_eq!(root, PathBuf::from("/tmp/genarc-env"));
    env::remove_var(ROOT_ENV_VAR);
}

#[test]
#[serial]
fn test_config_file_beats_default() {
    env::remove_var(ROOT_ENV_VAR);
    let config = IngestConfig {
        root_folder: Some(PathBuf::from("/tmp/genarc-toml")),
        ..Default::default()
    };

    assert_eq!(resolve_root_folder(None, &config), PathBuf::from("/tmp/genarc-toml"));
}

#[test]
#[serial]
fn test_falls_back_to_platform_default() {
    env::remove_var(ROOT_ENV_VAR);
    let root = resolve_root_folder(None, &IngestConfig::default());
    assert_eq!(root, default_root_folder());
    assert!(!root.as_os_str().is_empty());
}

#[test]
fn test_load_reads_toml_file() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("config.toml");
    fs::write(
        &path,
        "root_folder = \"/srv/genarc\"\ncompressed = true\ndest_dir = \"archive\"\n",
    )
    .unwrap();

    let config = IngestConfig::load(&path).unwrap();

    assert_eq!(config.root_folder, Some(PathBuf::from("/srv/genarc")));
    assert!(config.compressed);
    assert_eq!(config.dest_dir, PathBuf::from("archive"));
    assert_eq!(config.staging_dir, PathBuf::from("temp"));
}

#[test]
fn test_missing_file_uses_defaults() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("absent.toml");

    let config = IngestConfig::load_or_default(Some(&path)).unwrap();

    assert_eq!(config, IngestConfig::default());
}

#[test]
fn test_malformed_file_is_an_error() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("config.toml");
    fs::write(&path, "compressed = [not valid").unwrap();

    let result = IngestConfig::load_or_default(Some(&path));

    assert!(matches!(result, Err(Error::Toml(_))));
}
