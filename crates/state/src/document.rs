// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The persisted state document.
//!
//! `StateDoc` is the serializable whole: typed data slots, changes, tasks,
//! ID counters, warnings, and notices. All graph bookkeeping (halt edges,
//! lane aborts, status derivation) lives here; locking and persistence live
//! in [`crate::State`].

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use warden_core::{ChangeId, ChangeStatus, TaskId, TaskStatus};

use crate::graph;
use crate::{Change, Notices, StateError, Task, Warnings};

/// The whole persisted state document.
///
/// Serialized as a single JSON object and atomically replaced on disk at
/// every checkpoint. Maps are `IndexMap` so the encoding is deterministic.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StateDoc {
    #[serde(default)]
    pub data: IndexMap<String, Value>,
    #[serde(default)]
    pub changes: IndexMap<String, Change>,
    #[serde(default)]
    pub tasks: IndexMap<String, Task>,
    #[serde(default)]
    pub last_change_id: u64,
    #[serde(default)]
    pub last_task_id: u64,
    #[serde(default)]
    pub last_notice_id: u64,
    #[serde(default, skip_serializing_if = "Warnings::is_empty")]
    pub warnings: Warnings,
    #[serde(default, skip_serializing_if = "Notices::is_empty")]
    pub notices: Notices,
}

impl StateDoc {
    /// Allocate a new change. IDs are monotonic and never recycled.
    pub fn new_change(
        &mut self,
        kind: impl Into<String>,
        summary: impl Into<String>,
        now: DateTime<Utc>,
    ) -> ChangeId {
        self.last_change_id += 1;
        let id = ChangeId::from_counter(self.last_change_id);
        let change = Change::new(id.clone(), kind, summary, now);
        self.changes.insert(id.to_string(), change);
        id
    }

    /// Allocate a new task attached to the given change.
    pub fn new_task(
        &mut self,
        change_id: &ChangeId,
        kind: impl Into<String>,
        summary: impl Into<String>,
    ) -> Result<TaskId, StateError> {
        if !self.changes.contains_key(change_id.as_str()) {
            return Err(StateError::NoSuchChange(change_id.clone()));
        }
        self.last_task_id += 1;
        let id = TaskId::from_counter(self.last_task_id);
        let task = Task::new(id.clone(), change_id.clone(), kind, summary);
        self.tasks.insert(id.to_string(), task);
        if let Some(change) = self.changes.get_mut(change_id.as_str()) {
            change.task_ids.push(id.clone());
        }
        Ok(id)
    }

    /// Add a halt edge: `after` may only run once `before` is ready.
    ///
    /// Rejects edges across changes and edges that would close a cycle,
    /// leaving the graph untouched in both cases.
    pub fn add_halt(&mut self, before: &TaskId, after: &TaskId) -> Result<(), StateError> {
        let before_change = self
            .tasks
            .get(before.as_str())
            .ok_or_else(|| StateError::NoSuchTask(before.clone()))?
            .change_id
            .clone();
        let after_change = self
            .tasks
            .get(after.as_str())
            .ok_or_else(|| StateError::NoSuchTask(after.clone()))?
            .change_id
            .clone();
        if before_change != after_change {
            return Err(StateError::ForeignTask(before.clone(), after.clone()));
        }

        // Reject if `before` is already reachable from `after`
        if graph::reachable(&self.tasks, after, before) {
            return Err(StateError::DependencyCycle {
                task: after.clone(),
                required_by: before.clone(),
            });
        }

        if let Some(task) = self.tasks.get_mut(before.as_str()) {
            if !task.halt_tasks.contains(after) {
                task.halt_tasks.push(after.clone());
            }
        }
        if let Some(task) = self.tasks.get_mut(after.as_str()) {
            if !task.wait_tasks.contains(before) {
                task.wait_tasks.push(before.clone());
            }
        }
        Ok(())
    }

    /// All prerequisites of a do-direction task are ready.
    pub fn do_prereqs_met(&self, task: &Task) -> bool {
        task.wait_tasks.iter().all(|id| {
            self.tasks
                .get(id.as_str())
                .is_some_and(|t| t.status.is_ready())
        })
    }

    /// All halt-successors of an undo-direction task are settled, so the
    /// undo wavefront may move backwards over it.
    pub fn undo_prereqs_met(&self, task: &Task) -> bool {
        task.halt_tasks.iter().all(|id| {
            self.tasks
                .get(id.as_str())
                .is_some_and(|t| t.status.is_terminal())
        })
    }

    /// Abort the lanes of the given task across its whole change.
    ///
    /// Unstarted do-side tasks are held, running tasks are flagged for the
    /// runner, and completed tasks become undo candidates.
    pub fn abort_task_lanes(&mut self, task_id: &TaskId) {
        let Some(task) = self.tasks.get(task_id.as_str()) else {
            return;
        };
        let lanes: Vec<u64> = task.effective_lanes().to_vec();
        let change_id = task.change_id.clone();

        if let Some(change) = self.changes.get_mut(change_id.as_str()) {
            change.mark_lanes_aborted(&lanes);
        }

        for t in self.tasks.values_mut() {
            if t.change_id != change_id || t.id == *task_id || !t.in_any_lane(&lanes) {
                continue;
            }
            t.status = match t.status {
                TaskStatus::Do | TaskStatus::Wait => TaskStatus::Hold,
                TaskStatus::Doing => TaskStatus::Abort,
                TaskStatus::Done => TaskStatus::Undo,
                other => other,
            };
        }
    }

    /// Derive a change's status from its tasks. First matching rule wins.
    pub fn change_status(&self, change: &Change) -> ChangeStatus {
        let tasks: Vec<&Task> = change
            .task_ids
            .iter()
            .filter_map(|id| self.tasks.get(id.as_str()))
            .collect();

        // 1. Anything running, or runnable with satisfied prerequisites
        for t in &tasks {
            match t.status {
                TaskStatus::Doing | TaskStatus::Undoing | TaskStatus::Abort => {
                    return ChangeStatus::Doing
                }
                TaskStatus::Do if self.do_prereqs_met(t) => return ChangeStatus::Doing,
                TaskStatus::Undo if self.undo_prereqs_met(t) => return ChangeStatus::Doing,
                _ => {}
            }
        }

        // 2. Everything completed
        if tasks.iter().all(|t| t.status == TaskStatus::Done) {
            return ChangeStatus::Done;
        }

        let all_terminal = tasks.iter().all(|t| t.status.is_terminal());

        // 3. Something failed or was held back, rest settled
        if all_terminal
            && tasks
                .iter()
                .any(|t| matches!(t.status, TaskStatus::Error | TaskStatus::Hold))
        {
            return ChangeStatus::Error;
        }

        // 4. Settled with at least one task reverted
        if all_terminal && tasks.iter().any(|t| t.status == TaskStatus::Undone) {
            return ChangeStatus::Undone;
        }

        ChangeStatus::Wait
    }

    /// Abort a whole change: every lane it ever minted, plus the implicit
    /// lane 0.
    pub fn abort_change(&mut self, change_id: &ChangeId) {
        let Some(change) = self.changes.get_mut(change_id.as_str()) else {
            return;
        };
        let lanes: Vec<u64> = (0..=change.lane_counter).collect();
        change.mark_lanes_aborted(&lanes);

        for t in self.tasks.values_mut() {
            if t.change_id != *change_id {
                continue;
            }
            t.status = match t.status {
                TaskStatus::Do | TaskStatus::Wait => TaskStatus::Hold,
                TaskStatus::Doing => TaskStatus::Abort,
                TaskStatus::Done => TaskStatus::Undo,
                other => other,
            };
        }
    }

    /// Aggregate progress of a change: the sum over its tasks. Tasks
    /// without explicit progress count as one unit, done once ready.
    pub fn change_progress(&self, change: &Change) -> (u64, u64) {
        let mut done = 0;
        let mut total = 0;
        for id in &change.task_ids {
            let Some(task) = self.tasks.get(id.as_str()) else {
                continue;
            };
            match &task.progress {
                Some(progress) => {
                    done += progress.done;
                    total += progress.total;
                }
                None => {
                    done += u64::from(task.status.is_ready());
                    total += 1;
                }
            }
        }
        (done, total)
    }

    /// Stamp `ready_time` on changes that just became terminal.
    pub fn finalize_ready(&mut self, now: DateTime<Utc>) {
        let ready: Vec<String> = self
            .changes
            .values()
            .filter(|c| c.ready_time.is_none() && self.change_status(c).is_terminal())
            .map(|c| c.id.to_string())
            .collect();
        for id in ready {
            if let Some(change) = self.changes.get_mut(&id) {
                change.ready_time = Some(now);
            }
        }
    }

    /// Consolidated error text for a terminal change, aggregated from its
    /// failed tasks' log entries.
    pub fn err_summary(&self, change: &Change) -> Option<String> {
        let mut lines = Vec::new();
        for id in &change.task_ids {
            let Some(task) = self.tasks.get(id.as_str()) else {
                continue;
            };
            if task.status != TaskStatus::Error {
                continue;
            }
            match task.last_error() {
                Some(err) => lines.push(format!("{} ({})", task.summary, err)),
                None => lines.push(format!("{} (task failed)", task.summary)),
            }
        }
        if lines.is_empty() {
            None
        } else {
            Some(format!(
                "cannot perform the following tasks:\n- {}",
                lines.join("\n- ")
            ))
        }
    }

    /// Typed read of a top-level data slot.
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

    /// Typed write of a top-level data slot.
    pub fn data_set<T: Serialize>(&mut self, key: &str, value: &T) -> Result<(), StateError> {
        let value = serde_json::to_value(value).map_err(|source| StateError::Encode {
            key: key.to_string(),
            source,
        })?;
        self.data.insert(key.to_string(), value);
        Ok(())
    }

    /// Reset in-flight task statuses after a restart so interrupted work is
    /// re-dispatched. Tasks that marked themselves atomic-complete keep
    /// their running status for the completion pass to finish.
    pub fn reset_in_flight(&mut self) -> usize {
        let mut reset = 0;
        for task in self.tasks.values_mut() {
            if task.is_atomic_complete() {
                continue;
            }
            let new_status = match task.status {
                TaskStatus::Doing => TaskStatus::Do,
                TaskStatus::Undoing | TaskStatus::Abort => TaskStatus::Undo,
                _ => continue,
            };
            task.status = new_status;
            reset += 1;
        }
        reset
    }
}

#[cfg(test)]
#[path = "document_tests.rs"]
mod tests;
