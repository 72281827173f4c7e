//! Tests for bootstrap configuration and root folder resolution
//!
//! Tests that manipulate OTMDB_ROOT_FOLDER are marked #[serial] so they do
//! not race on the process environment.

use otmdb_common::config::{
    default_root_folder, read_toml_config, resolve_root_folder, write_toml_config, LoggingConfig,
    RootFolder, TomlConfig, ROOT_FOLDER_ENV,
};
use serial_test::serial;
use std::env;
use std::path::PathBuf;
use tempfile::TempDir;

#[test]
fn test_default_root_folder_is_not_empty() {
    let root = default_root_folder();
    assert!(!root.as_os_str().is_empty());
    assert!(root.to_string_lossy().contains("otmdb"));
}

#[test]
#[serial]
fn test_resolve_with_no_overrides_uses_default() {
    env::remove_var(ROOT_FOLDER_ENV);
    assert_eq!(resolve_root_folder(None, ROOT_FOLDER_ENV, None), default_root_folder());
}

#[test]
#[serial]
fn test_cli_argument_wins_over_everything() {
    env::set_var(ROOT_FOLDER_ENV, "/from/env");
    let config = TomlConfig {
        root_folder: Some(PathBuf::from("/from/toml")),
        ..Default::default()
    };

    let resolved = resolve_root_folder(Some("/from/cli"), ROOT_FOLDER_ENV, Some(&config));
    env::remove_var(ROOT_FOLDER_ENV);

    assert_eq!(resolved, PathBuf::from("/from/cli"));
}

#[test]
#[serial]
fn test_env_wins_over_toml() {
    env::set_var(ROOT_FOLDER_ENV, "/from/env");
    let config = TomlConfig {
        root_folder: Some(PathBuf::from("/from/toml")),
        ..Default::default()
    };

    let resolved = resolve_root_folder(None, ROOT_FOLDER_ENV, Some(&config));
    env::remove_var(ROOT_FOLDER_ENV);

    assert_eq!(resolved, PathBuf::from("/from/env"));
}

#[test]
#[serial]
fn test_empty_env_falls_through_to_toml() {
    env::set_var(ROOT_FOLDER_ENV, "");
    let config = TomlConfig {
        root_folder: Some(PathBuf::from("/from/toml")),
        ..Default::default()
    };

    let resolved = resolve_root_folder(None, ROOT_FOLDER_ENV, Some(&config));
    env::remove_var(ROOT_FOLDER_ENV);

    assert_eq!(resolved, PathBuf::from("/from/toml"));
}

#[test]
fn test_toml_write_then_read() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("conf").join("config.toml");

    let config = TomlConfig {
        root_folder: Some(PathBuf::from("/srv/otmdb")),
        database_file: Some("catalogue.db".to_string()),
        logging: LoggingConfig {
            level: "debug".to_string(),
            file: None,
        },
    };
    write_toml_config(&config, &path).unwrap();

    let loaded = read_toml_config(&path).unwrap();
    assert_eq!(loaded.root_folder, config.root_folder);
    assert_eq!(loaded.database_file(), "catalogue.db");
    assert_eq!(loaded.logging.level, "debug");
}

#[test]
fn test_missing_toml_file_is_io_error() {
    let temp_dir = TempDir::new().unwrap();
    let err = read_toml_config(&temp_dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, otmdb_common::Error::Io(_)));
}

#[test]
fn test_root_folder_creates_directory() {
    let temp_dir = TempDir::new().unwrap();
    let root = RootFolder::new(temp_dir.path().join("a").join("b"), "otmdb.db");

    root.ensure_directory_exists().unwrap();

    assert!(root.path().is_dir());
    assert_eq!(root.database_path(), temp_dir.path().join("a").join("b").join("otmdb.db"));
}
