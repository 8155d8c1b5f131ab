// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! State persistence backend.
//!
//! `checkpoint` atomically replaces the on-disk document: write to `.tmp`,
//! fsync the file, rename over the target, fsync the directory. Only after
//! the directory fsync is the replacement durable across power loss.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::warn;
use warden_core::RestartKind;

use crate::StateDoc;

/// Operations the state store needs from its host.
pub trait Backend: Send + Sync {
    /// Atomically replace the persisted document with `data`.
    fn checkpoint(&self, data: &[u8]) -> io::Result<()>;

    /// Ask the ensure loop to fire within the given bound.
    fn ensure_before(&self, d: Duration);

    /// Ask the host to restart.
    fn request_restart(&self, kind: RestartKind);
}

/// Filesystem backend writing a single `state.json`.
///
/// `ensure_before` and `request_restart` are no-ops here; the overlord
/// wraps this backend to wire them into its loop.
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Backend for FileBackend {
    fn checkpoint(&self, data: &[u8]) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let tmp_path = self.path.with_extension("tmp");
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(data)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp_path, &self.path)?;

        if let Some(parent) = self.path.parent() {
            File::open(parent)?.sync_all()?;
        }
        Ok(())
    }

    fn ensure_before(&self, _d: Duration) {}

    fn request_restart(&self, _kind: RestartKind) {}
}

const MAX_BAK_FILES: u32 = 3;

/// Pick the next `.bak` / `.bak.N` path, rotating older backups out.
///
/// Keeps up to [`MAX_BAK_FILES`] backups: `.bak`, `.bak.2`, `.bak.3`.
/// The oldest backup is removed when the limit is reached.
fn rotate_bak_path(path: &Path) -> PathBuf {
    let bak = |n: u32| {
        if n == 1 {
            path.with_extension("bak")
        } else {
            path.with_extension(format!("bak.{n}"))
        }
    };

    let oldest = bak(MAX_BAK_FILES);
    if oldest.exists() {
        let _ = std::fs::remove_file(&oldest);
    }

    for n in (1..MAX_BAK_FILES).rev() {
        let src = bak(n);
        if src.exists() {
            let _ = std::fs::rename(&src, bak(n + 1));
        }
    }

    bak(1)
}

/// Load the persisted document if it exists.
///
/// Returns `Ok(None)` if the file doesn't exist or is corrupt. A corrupt
/// document is rotated to a `.bak` file so startup can continue with an
/// empty state without discarding evidence.
pub fn load_document(path: &Path) -> io::Result<Option<StateDoc>> {
    if !path.exists() {
        return Ok(None);
    }

    let file = File::open(path)?;
    let reader = io::BufReader::new(file);
    match serde_json::from_reader(reader) {
        Ok(doc) => Ok(Some(doc)),
        Err(e) => {
            let bak_path = rotate_bak_path(path);
            warn!(
                error = %e,
                path = %path.display(),
                bak = %bak_path.display(),
                "corrupt state document, moving to .bak and starting fresh",
            );
            std::fs::rename(path, &bak_path)?;
            Ok(None)
        }
    }
}

#[cfg(test)]
#[path = "backend_tests.rs"]
mod tests;
