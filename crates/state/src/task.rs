// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task entity: the smallest scheduled unit, owned by a change.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use warden_core::{ChangeId, Progress, TaskId, TaskStatus};

use crate::StateError;

/// Maximum entries kept in a task's log ring; overflow drops the oldest.
pub const MAX_LOG_ENTRIES: usize = 10;

/// Data slot a handler sets once its side effects are fully applied, so a
/// crash between the handler finishing and the completion bookkeeping does
/// not re-run it on restart.
pub const ATOMIC_COMPLETE: &str = "atomic-complete";

/// A single timestamped task log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub time: DateTime<Utc>,
    pub message: String,
}

/// A task instance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Task {
    pub id: TaskId,
    pub kind: String,
    pub summary: String,
    pub change_id: ChangeId,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub log: Vec<LogEntry>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub data: IndexMap<String, Value>,
    /// Successors: tasks that must not run before this one is ready
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub halt_tasks: Vec<TaskId>,
    /// Prerequisites: tasks this one waits for (reverse of halt edges)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub wait_tasks: Vec<TaskId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lanes: Vec<u64>,
    /// Not-before gate: the runner skips this task until the time passes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub retry_count: u32,
}

impl Task {
    pub fn new(
        id: TaskId,
        change_id: ChangeId,
        kind: impl Into<String>,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            id,
            kind: kind.into(),
            summary: summary.into(),
            change_id,
            status: TaskStatus::Do,
            progress: None,
            log: Vec::new(),
            data: IndexMap::new(),
            halt_tasks: Vec::new(),
            wait_tasks: Vec::new(),
            lanes: Vec::new(),
            at_time: None,
            retry_count: 0,
        }
    }

    /// Append a log entry, dropping the oldest past [`MAX_LOG_ENTRIES`].
    pub fn log(&mut self, now: DateTime<Utc>, message: impl Into<String>) {
        self.log.push(LogEntry {
            time: now,
            message: message.into(),
        });
        if self.log.len() > MAX_LOG_ENTRIES {
            let excess = self.log.len() - MAX_LOG_ENTRIES;
            self.log.drain(..excess);
        }
    }

    /// Record progress; idempotent and monotonic per label.
    pub fn set_progress(&mut self, label: &str, done: u64, total: u64) {
        match &mut self.progress {
            Some(p) => p.update(label, done, total),
            None => self.progress = Some(Progress::new(label, done.min(total), total)),
        }
    }

    /// The last error message recorded in the log, if any.
    pub fn last_error(&self) -> Option<&str> {
        self.log
            .iter()
            .rev()
            .find(|e| e.message.starts_with("ERROR"))
            .map(|e| e.message.as_str())
    }

    /// Lane membership used for abort grouping; tasks without explicit
    /// lanes share the implicit lane 0.
    pub fn effective_lanes(&self) -> &[u64] {
        if self.lanes.is_empty() {
            &[0]
        } else {
            &self.lanes
        }
    }

    pub fn in_any_lane(&self, lanes: &[u64]) -> bool {
        self.effective_lanes().iter().any(|l| lanes.contains(l))
    }

    /// Typed read of a task data slot.
    pub fn data_get<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, StateError> {
        match self.data.get(key) {
            None => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|source| StateError::Decode {
                    key: key.to_string(),
                    source,
                }),
        }
    }

    /// Typed write of a task data slot.
    pub fn data_set<T: Serialize>(&mut self, key: &str, value: &T) -> Result<(), StateError> {
        let value = serde_json::to_value(value).map_err(|source| StateError::Encode {
            key: key.to_string(),
            source,
        })?;
        self.data.insert(key.to_string(), value);
        Ok(())
    }

    /// Mark this task's side effects as fully applied (see [`ATOMIC_COMPLETE`]).
    pub fn mark_atomic_complete(&mut self) -> Result<(), StateError> {
        self.data_set(ATOMIC_COMPLETE, &true)
    }

    pub fn is_atomic_complete(&self) -> bool {
        self.data_get::<bool>(ATOMIC_COMPLETE)
            .ok()
            .flatten()
            .unwrap_or(false)
    }
}

#[cfg(test)]
#[path = "task_tests.rs"]
mod tests;
