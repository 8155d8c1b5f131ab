// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Run inhibition: block package launches while the daemon mutates the
//! package.
//!
//! Per package two files live under the inhibit directory:
//! - `<name>.lock` — the hint file, holding the current hint string (empty
//!   means "not inhibited"); doubles as the coordination lock;
//! - `<name>.<hint>` — the info file for the current hint, JSON with the
//!   previous package revision.
//!
//! Writers take the exclusive lock and write info before hint; readers take
//! the shared lock. An older layout kept hint and revision in a single
//! `<name>_v2.lock` JSON file; it is migrated on first touch, never
//! silently discarded.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{FileLock, LockError};

/// Reserved postfix of the hint file itself; never a valid hint.
const HINT_FILE_POSTFIX: &str = "lock";

/// Why a package is inhibited. Closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InhibitHint {
    /// A refresh is pending user gating
    GateRefresh,
    /// The package is being refreshed right now
    Refresh,
    /// A refresh download is in flight
    PreDownload,
}

warden_core::simple_display! {
    InhibitHint {
        GateRefresh => "gate-refresh",
        Refresh => "refresh",
        PreDownload => "pre-download",
    }
}

impl FromStr for InhibitHint {
    type Err = LockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gate-refresh" => Ok(InhibitHint::GateRefresh),
            "refresh" => Ok(InhibitHint::Refresh),
            "pre-download" => Ok(InhibitHint::PreDownload),
            other => Err(LockError::InvalidHint(other.to_string())),
        }
    }
}

/// Context stored next to a hint: what was installed before the mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InhibitInfo {
    pub previous_revision: u32,
}

/// Legacy single-file layout (`<name>_v2.lock`).
#[derive(Debug, Deserialize)]
struct LegacyRecord {
    hint: String,
    previous_revision: u32,
}

/// The per-package inhibition file store.
#[derive(Debug, Clone)]
pub struct InhibitDir {
    dir: PathBuf,
}

impl InhibitDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn hint_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.{HINT_FILE_POSTFIX}"))
    }

    fn info_path(&self, name: &str, hint: InhibitHint) -> PathBuf {
        self.dir.join(format!("{name}.{hint}"))
    }

    fn legacy_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}_v2.lock"))
    }

    fn open_hint(&self, name: &str) -> Result<FileLock, LockError> {
        if name.is_empty() || name.contains('/') || name.contains('.') {
            return Err(LockError::InvalidName(name.to_string()));
        }
        std::fs::create_dir_all(&self.dir)?;
        FileLock::open(&self.hint_path(name))
    }

    const ALL_HINTS: [InhibitHint; 3] = [
        InhibitHint::GateRefresh,
        InhibitHint::Refresh,
        InhibitHint::PreDownload,
    ];

    /// Set the inhibition hint for a package.
    ///
    /// Sequence: exclusive-lock hint file, write the info file, then the
    /// hint text. Info files of other hints are removed so `<name>.<h2>`
    /// never survives a hint change.
    pub fn lock_with_hint(
        &self,
        name: &str,
        hint: InhibitHint,
        info: InhibitInfo,
    ) -> Result<(), LockError> {
        self.migrate_legacy(name)?;

        let mut lock = self.open_hint(name)?;
        lock.lock_exclusive()?;

        let result = (|| {
            std::fs::write(
                self.info_path(name, hint),
                serde_json::to_vec(&info)?,
            )?;
            for other in Self::ALL_HINTS {
                if other != hint {
                    remove_if_present(&self.info_path(name, other))?;
                }
            }
            lock.write_string(&hint.to_string())
        })();

        lock.unlock()?;
        result
    }

    /// Clear the hint (package no longer inhibited). The hint file stays
    /// behind holding the empty string.
    pub fn unlock_hint(&self, name: &str) -> Result<(), LockError> {
        self.migrate_legacy(name)?;

        let mut lock = self.open_hint(name)?;
        lock.lock_exclusive()?;

        let result = (|| {
            for hint in Self::ALL_HINTS {
                remove_if_present(&self.info_path(name, hint))?;
            }
            lock.write_string("")
        })();

        lock.unlock()?;
        result
    }

    /// Current hint and info, or `None` when the package is not inhibited.
    pub fn is_locked(&self, name: &str) -> Result<Option<(InhibitHint, InhibitInfo)>, LockError> {
        self.migrate_legacy(name)?;

        if !self.hint_path(name).exists() {
            return Ok(None);
        }

        let mut lock = self.open_hint(name)?;
        lock.lock_shared()?;
        let result = self.read_current(name, &mut lock);
        lock.unlock()?;
        result
    }

    fn read_current(
        &self,
        name: &str,
        lock: &mut FileLock,
    ) -> Result<Option<(InhibitHint, InhibitInfo)>, LockError> {
        let text = lock.read_string()?;
        if text.is_empty() {
            return Ok(None);
        }
        let hint = text.parse::<InhibitHint>()?;
        let bytes = std::fs::read(self.info_path(name, hint))?;
        let info: InhibitInfo = serde_json::from_slice(&bytes)?;
        Ok(Some((hint, info)))
    }

    /// Wait until the package is no longer inhibited.
    ///
    /// - Hint file absent: `on_not_inhibited` runs with no lock held and
    ///   `Ok(None)` is returned.
    /// - Hint empty: `on_not_inhibited` runs under the shared lock, which
    ///   is returned still held.
    /// - Hint set: `on_inhibited(hint, info)` decides; `true` keeps the
    ///   shared lock and returns it, `false` releases and retries after
    ///   `interval` (or fails with `Cancelled` when the token fires).
    ///
    /// The returned lock is the caller's responsibility to release.
    pub async fn wait_while_inhibited<N, I>(
        &self,
        name: &str,
        mut on_not_inhibited: N,
        mut on_inhibited: I,
        interval: Duration,
        token: &CancellationToken,
    ) -> Result<Option<FileLock>, LockError>
    where
        N: FnMut(),
        I: FnMut(&InhibitHint, &InhibitInfo) -> bool,
    {
        self.migrate_legacy(name)?;

        if !self.hint_path(name).exists() {
            on_not_inhibited();
            return Ok(None);
        }

        loop {
            if token.is_cancelled() {
                return Err(LockError::Cancelled);
            }

            let mut lock = self.open_hint(name)?;
            lock.lock_shared()?;

            match self.read_current(name, &mut lock)? {
                None => {
                    on_not_inhibited();
                    return Ok(Some(lock));
                }
                Some((hint, info)) => {
                    if on_inhibited(&hint, &info) {
                        return Ok(Some(lock));
                    }
                }
            }

            lock.unlock()?;
            drop(lock);

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = token.cancelled() => return Err(LockError::Cancelled),
            }
        }
    }

    /// Delete the hint and info files. Absent files are not an error.
    pub fn remove_lock_file(&self, name: &str) -> Result<(), LockError> {
        let hint_path = self.hint_path(name);
        if !hint_path.exists() {
            // Nothing to lock against; clear leftovers and the legacy file
            for hint in Self::ALL_HINTS {
                remove_if_present(&self.info_path(name, hint))?;
            }
            remove_if_present(&self.legacy_path(name))?;
            return Ok(());
        }

        let lock = self.open_hint(name)?;
        lock.lock_exclusive()?;

        let result = (|| {
            for hint in Self::ALL_HINTS {
                remove_if_present(&self.info_path(name, hint))?;
            }
            remove_if_present(&self.legacy_path(name))?;
            remove_if_present(&hint_path)
        })();

        lock.unlock()?;
        result
    }

    /// Rewrite data from the old single-file layout in the current form.
    fn migrate_legacy(&self, name: &str) -> Result<(), LockError> {
        let legacy_path = self.legacy_path(name);
        if !legacy_path.exists() {
            return Ok(());
        }

        let legacy_lock = FileLock::open(&legacy_path)?;
        legacy_lock.lock_exclusive()?;

        let result = (|| {
            // Re-check under the lock; another process may have migrated
            if !legacy_path.exists() {
                return Ok(());
            }
            let bytes = std::fs::read(&legacy_path)?;
            let record: LegacyRecord = serde_json::from_slice(&bytes)?;
            info!(package = name, hint = %record.hint, "migrating legacy inhibit lock layout");

            let mut lock = self.open_hint(name)?;
            lock.lock_exclusive()?;
            let migrate = (|| {
                if record.hint.is_empty() {
                    lock.write_string("")
                } else {
                    let hint = record.hint.parse::<InhibitHint>()?;
                    let info = InhibitInfo {
                        previous_revision: record.previous_revision,
                    };
                    std::fs::write(self.info_path(name, hint), serde_json::to_vec(&info)?)?;
                    lock.write_string(&record.hint)
                }
            })();
            lock.unlock()?;
            migrate?;

            remove_if_present(&legacy_path)
        })();

        legacy_lock.unlock()?;
        result
    }
}

fn remove_if_present(path: &Path) -> Result<(), LockError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
#[path = "inhibit_tests.rs"]
mod tests;
