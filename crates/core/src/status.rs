// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task and change status machines.

use serde::{Deserialize, Serialize};

/// Status of a single task.
///
/// A task moves through the do direction (`Do` → `Doing` → `Done`) and, when
/// its lane is aborted after completion, through the undo direction
/// (`Undo` → `Undoing` → `Undone`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    /// Waiting to run
    Do,
    /// Handler is running
    Doing,
    /// Completed successfully
    Done,
    /// Lane aborted while the handler was running
    Abort,
    /// Held back; will never run (lane aborted before start)
    Hold,
    /// Handler failed
    Error,
    /// Waiting to be reverted
    Undo,
    /// Undo handler is running
    Undoing,
    /// Reverted successfully
    Undone,
    /// Parked until an external event re-triggers dispatch
    Wait,
}

impl TaskStatus {
    /// A ready task unblocks its halt-successors.
    pub fn is_ready(self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Undone)
    }

    /// Terminal statuses never change again without external intervention.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Done | TaskStatus::Undone | TaskStatus::Hold | TaskStatus::Error
        )
    }

    /// Statuses with a handler currently in flight.
    pub fn is_in_flight(self) -> bool {
        matches!(self, TaskStatus::Doing | TaskStatus::Undoing | TaskStatus::Abort)
    }
}

crate::simple_display! {
    TaskStatus {
        Do => "do",
        Doing => "doing",
        Done => "done",
        Abort => "abort",
        Hold => "hold",
        Error => "error",
        Undo => "undo",
        Undoing => "undoing",
        Undone => "undone",
        Wait => "wait",
    }
}

/// Status of a change, derived from its tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeStatus {
    /// At least one task is running or runnable
    Doing,
    /// Every task completed successfully
    Done,
    /// Some task failed or was held; the rest are settled
    Error,
    /// All tasks settled with at least one reverted
    Undone,
    /// Nothing is runnable right now
    Wait,
}

impl ChangeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ChangeStatus::Done | ChangeStatus::Error | ChangeStatus::Undone
        )
    }
}

crate::simple_display! {
    ChangeStatus {
        Doing => "doing",
        Done => "done",
        Error => "error",
        Undone => "undone",
        Wait => "wait",
    }
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
