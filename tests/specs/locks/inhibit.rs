//! Spec: launches wait while a package is inhibited and proceed, lock in
//! hand, the moment the daemon clears the hint.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use warden_locks::{FileLock, InhibitDir, InhibitHint, InhibitInfo, LockError};

#[tokio::test]
async fn launch_waits_out_a_refresh() {
    let dir = tempfile::tempdir().unwrap();
    let inhibit = InhibitDir::new(dir.path());

    // Daemon side: mark the package as mid-refresh
    inhibit
        .lock_with_hint(
            "core",
            InhibitHint::Refresh,
            InhibitInfo {
                previous_revision: 11,
            },
        )
        .unwrap();

    // Daemon clears the hint a little later
    let daemon = {
        let inhibit = inhibit.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            inhibit.unlock_hint("core").unwrap();
        })
    };

    // Launcher side: wait with a 5ms poll
    let not_inhibited = Arc::new(AtomicU32::new(0));
    let token = CancellationToken::new();
    let lock = {
        let not_inhibited = Arc::clone(&not_inhibited);
        inhibit
            .wait_while_inhibited(
                "core",
                move || {
                    not_inhibited.fetch_add(1, Ordering::SeqCst);
                },
                |hint, info| {
                    assert_eq!(*hint, InhibitHint::Refresh);
                    assert_eq!(info.previous_revision, 11);
                    false
                },
                Duration::from_millis(5),
                &token,
            )
            .await
            .unwrap()
    };

    daemon.await.unwrap();

    // Returned with the shared lock held; exactly one not-inhibited call
    let lock = lock.expect("launcher should hold the hint lock");
    assert_eq!(not_inhibited.load(Ordering::SeqCst), 1);

    // The daemon cannot take the exclusive lock until the launcher is done
    let daemon_lock = FileLock::open(&inhibit.hint_path("core")).unwrap();
    assert!(matches!(
        daemon_lock.try_lock_exclusive(),
        Err(LockError::AlreadyLocked(_))
    ));
    lock.unlock().unwrap();
    daemon_lock.try_lock_exclusive().unwrap();
}

#[tokio::test]
async fn never_inhibited_package_launches_without_a_lock() {
    let dir = tempfile::tempdir().unwrap();
    let inhibit = InhibitDir::new(dir.path());

    let called = Arc::new(AtomicU32::new(0));
    let token = CancellationToken::new();
    let lock = {
        let called = Arc::clone(&called);
        inhibit
            .wait_while_inhibited(
                "fresh",
                move || {
                    called.fetch_add(1, Ordering::SeqCst);
                },
                |_, _| false,
                Duration::from_millis(5),
                &token,
            )
            .await
            .unwrap()
    };

    assert!(lock.is_none());
    assert_eq!(called.load(Ordering::SeqCst), 1);
}
