// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for lock operations

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur in lock operations
#[derive(Debug, Error)]
pub enum LockError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A try-lock variant would have had to wait
    #[error("already locked: {0}")]
    AlreadyLocked(PathBuf),

    /// Empty hints and the reserved `lock` postfix are rejected
    #[error("invalid inhibition hint {0:?}")]
    InvalidHint(String),

    #[error("invalid lock name {0:?}")]
    InvalidName(String),

    #[error("cannot decode inhibit info: {0}")]
    Decode(#[from] serde_json::Error),

    /// Cooperative cancellation was signalled while waiting
    #[error("operation cancelled")]
    Cancelled,
}
