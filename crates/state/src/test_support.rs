// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory backend and helpers for tests across the workspace.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use warden_core::RestartKind;

use crate::Backend;

/// In-memory backend recording every interaction.
///
/// `fail_next_checkpoint` makes exactly one checkpoint fail, for exercising
/// the rollback path.
#[derive(Default)]
pub struct MemBackend {
    pub checkpoints: Mutex<Vec<Vec<u8>>>,
    pub ensure_requests: Mutex<Vec<Duration>>,
    pub restart_requests: Mutex<Vec<RestartKind>>,
    fail_next: AtomicBool,
}

impl MemBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_next_checkpoint(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// The most recent checkpointed document, decoded.
    pub fn last_doc(&self) -> Option<crate::StateDoc> {
        let checkpoints = self.checkpoints.lock();
        let bytes = checkpoints.last()?;
        serde_json::from_slice(bytes).ok()
    }

    pub fn checkpoint_count(&self) -> usize {
        self.checkpoints.lock().len()
    }
}

impl Backend for MemBackend {
    fn checkpoint(&self, data: &[u8]) -> std::io::Result<()> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(std::io::Error::other("injected checkpoint failure"));
        }
        self.checkpoints.lock().push(data.to_vec());
        Ok(())
    }

    fn ensure_before(&self, d: Duration) {
        self.ensure_requests.lock().push(d);
    }

    fn request_restart(&self, kind: RestartKind) {
        self.restart_requests.lock().push(kind);
    }
}
