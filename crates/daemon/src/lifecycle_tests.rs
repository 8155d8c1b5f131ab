// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serial_test::serial;
use tempfile::tempdir;

fn test_config(dir: &std::path::Path) -> Config {
    Config {
        state_dir: dir.to_owned(),
        state_path: dir.join("state.json"),
        lock_path: dir.join("wardend.pid"),
        log_path: dir.join("wardend.log"),
        inhibit_dir: dir.join("inhibit"),
        run_lock_dir: dir.join("lock"),
        ensure_interval: Duration::from_secs(600),
        prune: PruneOptions::default(),
    }
}

#[tokio::test]
async fn startup_writes_pid_and_shutdown_removes_it() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());

    let daemon = startup(&config).await.unwrap();
    let pid = std::fs::read_to_string(&config.lock_path).unwrap();
    assert_eq!(pid.trim(), std::process::id().to_string());
    assert!(config.inhibit_dir.exists());
    assert!(daemon.inhibit.is_locked("core").unwrap().is_none());

    daemon.shutdown().await;
    assert!(!config.lock_path.exists());
}

#[tokio::test]
async fn second_startup_fails_while_first_holds_the_lock() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());

    let daemon = startup(&config).await.unwrap();
    let err = startup(&config).await.unwrap_err();
    assert!(matches!(err, LifecycleError::LockFailed(_)));

    daemon.shutdown().await;
}

#[tokio::test]
async fn state_survives_daemon_restart() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());

    {
        let daemon = startup(&config).await.unwrap();
        let state = daemon.overlord.state();
        let mut guard = state.lock();
        guard.set("installed-revision", &7u32).unwrap();
        guard.unlock().unwrap();
        daemon.shutdown().await;
    }

    let daemon = startup(&config).await.unwrap();
    let state = daemon.overlord.state();
    let revision: Option<u32> = state.lock().get("installed-revision").unwrap();
    assert_eq!(revision, Some(7));
    daemon.shutdown().await;
}

#[test]
#[serial]
fn config_load_reads_warden_toml() {
    let dir = tempdir().unwrap();
    std::env::set_var("WARDEN_STATE_DIR", dir.path());
    std::fs::write(
        dir.path().join("warden.toml"),
        "ensure_interval_secs = 60\nabandon_age_days = 3\nmax_changes = 100\n",
    )
    .unwrap();

    let config = Config::load().unwrap();
    assert_eq!(config.ensure_interval, Duration::from_secs(60));
    assert_eq!(
        config.prune.abandon_age,
        Duration::from_secs(3 * 24 * 60 * 60)
    );
    assert_eq!(config.prune.max_changes, 100);
    assert_eq!(config.run_lock_dir, dir.path().join("lock"));

    std::env::remove_var("WARDEN_STATE_DIR");
}

#[test]
#[serial]
fn config_load_without_file_uses_defaults() {
    let dir = tempdir().unwrap();
    std::env::set_var("WARDEN_STATE_DIR", dir.path());
    std::env::remove_var("WARDEN_ENSURE_INTERVAL_SECS");

    let config = Config::load().unwrap();
    assert_eq!(config.ensure_interval, Duration::from_secs(300));
    assert_eq!(config.prune.max_changes, 500);

    std::env::remove_var("WARDEN_STATE_DIR");
}

#[test]
#[serial]
fn bad_config_file_is_an_error() {
    let dir = tempdir().unwrap();
    std::env::set_var("WARDEN_STATE_DIR", dir.path());
    std::fs::write(dir.path().join("warden.toml"), "ensure_interval_secs = [").unwrap();

    let err = Config::load().unwrap_err();
    assert!(matches!(err, LifecycleError::BadConfig(..)));

    std::env::remove_var("WARDEN_STATE_DIR");
}
