// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pruning of abandoned changes.
//!
//! Terminal changes older than the abandon age are removed with their
//! tasks; when more than `max_changes` terminal changes remain, the oldest
//! go first. Non-terminal changes are never pruned.

use chrono::{DateTime, Duration, Utc};

use crate::StateDoc;

/// Pruning policy knobs. The exact values are parameters, not a contract.
#[derive(Debug, Clone)]
pub struct PruneOptions {
    /// Age past `ready_time` after which a terminal change is abandoned
    pub abandon_age: std::time::Duration,
    /// Maximum terminal changes retained regardless of age
    pub max_changes: usize,
}

impl Default for PruneOptions {
    fn default() -> Self {
        Self {
            abandon_age: std::time::Duration::from_secs(7 * 24 * 60 * 60),
            max_changes: 500,
        }
    }
}

/// Terminal changes due for removal, oldest first.
pub(crate) fn collect_doomed(doc: &StateDoc, now: DateTime<Utc>, opts: &PruneOptions) -> Vec<String> {
    let abandon_age = Duration::from_std(opts.abandon_age).unwrap_or_else(|_| Duration::days(7));

    // Terminal changes with their ready times, oldest first
    let mut terminal: Vec<(String, DateTime<Utc>)> = doc
        .changes
        .values()
        .filter(|c| doc.change_status(c).is_terminal())
        .filter_map(|c| c.ready_time.map(|t| (c.id.to_string(), t)))
        .collect();
    terminal.sort_by_key(|(_, t)| *t);

    let mut doomed: Vec<String> = Vec::new();
    for (id, ready) in &terminal {
        if *ready + abandon_age <= now {
            doomed.push(id.clone());
        }
    }

    // Cap the survivors
    let surviving = terminal.len() - doomed.len();
    if surviving > opts.max_changes {
        let excess = surviving - opts.max_changes;
        let extra: Vec<String> = terminal
            .iter()
            .filter(|(id, _)| !doomed.contains(id))
            .take(excess)
            .map(|(id, _)| id.clone())
            .collect();
        doomed.extend(extra);
    }

    doomed
}

pub(crate) fn prune_doc(doc: &mut StateDoc, now: DateTime<Utc>, opts: &PruneOptions) {
    for id in collect_doomed(doc, now, opts) {
        if let Some(change) = doc.changes.shift_remove(&id) {
            for task_id in &change.task_ids {
                doc.tasks.shift_remove(task_id.as_str());
            }
        }
    }

    doc.warnings.drop_expired(now);
    doc.notices.drop_expired(now);
}

#[cfg(test)]
#[path = "prune_tests.rs"]
mod tests;
