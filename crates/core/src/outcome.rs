// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Handler outcomes and restart requests.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What a task handler reports back to the runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The task completed; status becomes `Done` (or `Undone` on the undo side).
    Success,
    /// Re-dispatch the task after the given pause.
    Retry(Duration),
    /// Park the task until an external event re-triggers dispatch.
    Wait,
    /// The task failed; its lanes are aborted and completed work is undone.
    Error(String),
}

impl Outcome {
    /// Shorthand for `Outcome::Error` from anything displayable.
    pub fn err(reason: impl std::fmt::Display) -> Self {
        Outcome::Error(reason.to_string())
    }
}

crate::simple_display! {
    Outcome {
        Success => "success",
        Retry(..) => "retry",
        Wait => "wait",
        Error(..) => "error",
    }
}

/// Kind of restart a manager may request through the state backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartKind {
    /// Restart the daemon process
    Daemon,
    /// Reboot the system
    System,
    /// Halt the system
    Halt,
    /// Power the system off
    Poweroff,
    /// Restart socket activation only
    Socket,
}

crate::simple_display! {
    RestartKind {
        Daemon => "daemon",
        System => "system",
        Halt => "halt",
        Poweroff => "poweroff",
        Socket => "socket",
    }
}

#[cfg(test)]
#[path = "outcome_tests.rs"]
mod tests;
