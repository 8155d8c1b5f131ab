// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for the state store

use thiserror::Error;
use warden_core::{ChangeId, TaskId};

/// Errors that can occur in state operations
#[derive(Debug, Error)]
pub enum StateError {
    /// The durable checkpoint failed; the in-memory document was rolled
    /// back to the last persisted snapshot.
    #[error("cannot persist state: {0}")]
    Persistence(#[source] std::io::Error),

    #[error("cannot decode state entry {key:?}: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("cannot encode state entry {key:?}: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("no change with id {0}")]
    NoSuchChange(ChangeId),

    #[error("no task with id {0}")]
    NoSuchTask(TaskId),

    /// Adding the requested halt edge would close a cycle; the graph is
    /// left untouched.
    #[error("dependency cycle: task {task} already waits for {required_by}")]
    DependencyCycle { task: TaskId, required_by: TaskId },

    /// Tasks from different changes cannot be ordered against each other.
    #[error("tasks {0} and {1} belong to different changes")]
    ForeignTask(TaskId, TaskId),
}
