//! Config error-message, atomic-write-safety, and init integration tests.

use assert_fs::prelude::*;
use fieldsync_core::{config, Config, ConfigError};
use predicates::prelude::predicate;
use std::fs;

// ---------------------------------------------------------------------------
// 1. Load error messages
// ---------------------------------------------------------------------------

#[test]
fn load_missing_config_returns_not_found() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let err = config::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::ConfigNotFound { .. }), "got: {err}");
    assert!(err.to_string().contains("config.yaml"));
    assert!(err.to_string().contains("fieldsync init"));
}

#[test]
fn load_corrupt_yaml_returns_parse_error_with_path() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let dir = home.path().join(".fieldsync");
    fs::create_dir_all(&dir).expect("mkdir");
    fs::write(dir.join("config.yaml"), b": : corrupt : yaml : !!!\n  - broken: [unclosed")
        .expect("write");

    let err = config::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
    assert!(err.to_string().contains("config.yaml"));
}

#[test]
fn load_wrong_type_returns_parse_error() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let dir = home.path().join(".fieldsync");
    fs::create_dir_all(&dir).expect("mkdir");
    fs::write(dir.join("config.yaml"), b"sync:\n  poll_interval_secs: soon\n").expect("write");

    let err = config::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
}

// ---------------------------------------------------------------------------
// 2. Init
// ---------------------------------------------------------------------------

#[test]
fn init_writes_private_config_file() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    config::init_at(home.path(), false).expect("init");

    home.child(".fieldsync/config.yaml")
        .assert(predicate::path::exists());
    home.child(".fieldsync/config.yaml")
        .assert(predicate::str::contains("poll_interval_secs: 2"));

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let path = config::config_path_at(home.path());
        let mode = fs::metadata(&path).expect("meta").permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "expected 0600, got {mode:o}");
    }
}

#[test]
fn saved_config_roundtrips() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let mut cfg = Config::default();
    cfg.provider.base_url = "http://127.0.0.1:8080".to_string();
    cfg.store.user_id = "users/tester".to_string();
    cfg.logging.json = true;
    config::save_at(home.path(), &cfg).expect("save");

    let loaded = config::load_at(home.path()).expect("load");
    assert_eq!(loaded, cfg);
}
