//! Coverage for config loading and path resolution.

use std::path::PathBuf;

use sealrun::config::{config_dir, config_path_with, Config, DEFAULT_MAX_BLOB_SIZE};
use sealrun::runner::InputOrder;

#[test]
fn config_dir_resolves() {
    let path = match config_dir() {
        Ok(path) => path,
        Err(err) => panic!("config dir should resolve: {err}"),
    };
    assert!(path.ends_with(".sealrun"));
}

#[test]
fn default_config_path_is_under_config_dir() {
    let path = config_path_with(|_| None).expect("resolves");
    assert!(path.ends_with(".sealrun/config.toml"));
}

#[test]
fn load_reads_explicit_file() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let path = tmp.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
[store]
root = "/srv/sealrun/blobs"
max_blob_size = 4096

[runner]
workspace_root = "/srv/sealrun/ws"
timeout_secs = 60
input_order = "positional"

[logging]
level = "debug"
logs_dir = "/var/log/sealrun"
"#,
    )
    .expect("write config");

    // Env overrides may replace roots and sizes, so only assert the rest.
    let (config, _) = Config::load(Some(&path)).expect("load");
    assert_eq!(config.runner.input_order, InputOrder::Positional);
    assert_eq!(
        config.logging.logs_dir,
        Some(PathBuf::from("/var/log/sealrun"))
    );

    let parsed = Config::from_toml(&std::fs::read_to_string(&path).expect("read"))
        .expect("parse");
    assert_eq!(parsed.store.root, PathBuf::from("/srv/sealrun/blobs"));
    assert_eq!(parsed.store.max_blob_size, 4096);
    assert_eq!(parsed.runner.workspace_root, PathBuf::from("/srv/sealrun/ws"));
    assert_eq!(parsed.runner.timeout_secs, Some(60));
    assert_eq!(parsed.logging.level, "debug");
}

#[test]
fn load_missing_file_yields_defaults() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let (config, _) = Config::load(Some(&tmp.path().join("absent.toml"))).expect("load");
    assert_eq!(config.runner.input_order, InputOrder::Unordered);
    assert!(config.logging.logs_dir.is_none());
}

#[test]
fn load_rejects_malformed_file() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let path = tmp.path().join("config.toml");
    std::fs::write(&path, "[store\nroot = ").expect("write config");

    let err = Config::load(Some(&path)).expect_err("malformed config");
    assert!(err.to_string().contains("failed to parse config"));
}

#[test]
fn unknown_sections_are_ignored() {
    let config = Config::from_toml("[extra]\nkey = 1\n").expect("parse");
    assert_eq!(config.store.max_blob_size, DEFAULT_MAX_BLOB_SIZE);
}
