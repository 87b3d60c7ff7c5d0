//! Config file discovery
//!
//! Tests that touch PANELTRACK_CONFIG or PANELTRACK_ROOT are marked #[serial]
//! so they never race on the process environment.

use paneltrack_common::config::{
    config_file_path, load_toml_config, resolve_root_folder, TomlConfig, CONFIG_PATH_ENV,
    ROOT_FOLDER_ENV,
};
use serial_test::serial;
use std::env;
use std::path::{Path, PathBuf};

#[test]
#[serial]
fn test_explicit_config_path_wins() {
    env::set_var(CONFIG_PATH_ENV, "/etc/paneltrack/from-env.toml");
    let path = config_file_path(Some(Path::new("/tmp/explicit.toml")), "paneltrack-ingest.toml");
    assert_eq!(path, Some(PathBuf::from("/tmp/explicit.toml")));
    env::remove_var(CONFIG_PATH_ENV);
}

#[test]
#[serial]
fn test_env_config_path_before_default() {
    env::set_var(CONFIG_PATH_ENV, "/etc/paneltrack/from-env.toml");
    let path = config_file_path(None, "paneltrack-ingest.toml");
    assert_eq!(path, Some(PathBuf::from("/etc/paneltrack/from-env.toml")));
    env::remove_var(CONFIG_PATH_ENV);

    if let Some(default) = config_file_path(None, "paneltrack-ingest.toml") {
        assert!(default.ends_with("paneltrack/paneltrack-ingest.toml"));
    }
}

#[test]
#[serial]
fn test_blank_root_env_is_ignored() {
    env::set_var(ROOT_FOLDER_ENV, "   ");
    let toml_config = TomlConfig {
        root_folder: Some(PathBuf::from("/srv/comics-data")),
        ..Default::default()
    };
    assert_eq!(
        resolve_root_folder(None, &toml_config),
        PathBuf::from("/srv/comics-data")
    );
    env::remove_var(ROOT_FOLDER_ENV);

    // no override anywhere still yields a usable folder
    let fallback = resolve_root_folder(None, &TomlConfig::default());
    assert!(!fallback.as_os_str().is_empty());
}

#[test]
fn test_full_file_round_trip_through_loader() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("paneltrack-ingest.toml");
    std::fs::write(
        &path,
        r#"
bind_address = "0.0.0.0"
library_root = "/comics/library"
comicvine_api_key = "abc123"

[jobs]
async_bulk_threshold = 25

[external]
search_cache_ttl_secs = 60
"#,
    )
    .unwrap();

    let config = load_toml_config(&path).unwrap();
    assert_eq!(config.bind_address.as_deref(), Some("0.0.0.0"));
    assert_eq!(config.library_root, Some(PathBuf::from("/comics/library")));
    assert_eq!(config.comicvine_api_key.as_deref(), Some("abc123"));
    assert_eq!(config.jobs.async_bulk_threshold, 25);
    assert_eq!(config.external.search_cache_ttl_secs, 60);
    assert_eq!(config.external.max_consecutive_throttle_failures, 3);
    assert!(config.scoring.is_none());
}
