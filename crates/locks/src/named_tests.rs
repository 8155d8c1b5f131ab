// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use tempfile::tempdir;

#[test]
fn with_lock_passes_result_through() {
    let dir = tempdir().unwrap();
    let result = with_lock(dir.path(), "core", || 41 + 1).unwrap();
    assert_eq!(result, 42);
    assert!(lock_path(dir.path(), "core").exists());
}

#[test]
fn with_try_lock_fails_when_contended() {
    let dir = tempdir().unwrap();

    let holder = FileLock::open(&lock_path(dir.path(), "core")).unwrap();
    holder.lock_exclusive().unwrap();

    let err = with_try_lock(dir.path(), "core", || ()).unwrap_err();
    assert!(matches!(err, LockError::AlreadyLocked(_)));
}

#[test]
fn with_try_lock_succeeds_when_free() {
    let dir = tempdir().unwrap();
    with_try_lock(dir.path(), "core", || ()).unwrap();
    // Lock is released afterwards
    with_try_lock(dir.path(), "core", || ()).unwrap();
}

#[test]
fn lock_dir_creation_is_idempotent() {
    let dir = tempdir().unwrap();
    let nested = dir.path().join("run/locks");
    with_lock(&nested, "a", || ()).unwrap();
    with_lock(&nested, "b", || ()).unwrap();

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&nested).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }
}

#[yare::parameterized(
    empty      = { "" },
    slash      = { "../etc" },
    dot_prefix = { ".hidden" },
)]
fn invalid_names_are_rejected(name: &str) {
    let dir = tempdir().unwrap();
    let err = with_lock(dir.path(), name, || ()).unwrap_err();
    assert!(matches!(err, LockError::InvalidName(_)));
}
