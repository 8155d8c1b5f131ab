// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task progress reporting.

use serde::{Deserialize, Serialize};

/// Progress of a single task: `done` out of `total` units under a label.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub label: String,
    pub done: u64,
    pub total: u64,
}

impl Progress {
    pub fn new(label: impl Into<String>, done: u64, total: u64) -> Self {
        Self {
            label: label.into(),
            done,
            total,
        }
    }

    /// Update in place. Idempotent and monotonic per label: re-reporting an
    /// older `done` for the same label and total is ignored. Changing the
    /// label or total starts a new measurement.
    pub fn update(&mut self, label: &str, done: u64, total: u64) {
        if self.label == label && self.total == total {
            self.done = self.done.max(done.min(total));
        } else {
            self.label = label.to_string();
            self.total = total;
            self.done = done.min(total);
        }
    }
}

#[cfg(test)]
#[path = "progress_tests.rs"]
mod tests;
