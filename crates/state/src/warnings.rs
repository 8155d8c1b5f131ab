// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! User-visible warnings, deduplicated by message.
//!
//! A warning repeats after `repeat_after` once shown and silently expires
//! `expire_after` past its last occurrence.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Default time before an unrepeated warning is dropped (28 days).
pub const DEFAULT_EXPIRE_AFTER_SECS: u64 = 28 * 24 * 60 * 60;

/// Default time before a shown warning is shown again (24 hours).
pub const DEFAULT_REPEAT_AFTER_SECS: u64 = 24 * 60 * 60;

/// A single warning entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Warning {
    pub message: String,
    pub first_added: DateTime<Utc>,
    pub last_added: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_shown: Option<DateTime<Utc>>,
    pub expire_after_secs: u64,
    pub repeat_after_secs: u64,
}

impl Warning {
    fn expired(&self, now: DateTime<Utc>) -> bool {
        self.last_added + Duration::seconds(self.expire_after_secs as i64) <= now
    }

    /// Eligible for display: never shown, or the repeat window has passed.
    fn pending(&self, now: DateTime<Utc>) -> bool {
        match self.last_shown {
            None => true,
            Some(shown) => shown + Duration::seconds(self.repeat_after_secs as i64) <= now,
        }
    }
}

/// The warning store held by the state document.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Warnings {
    entries: Vec<Warning>,
}

impl Warnings {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Record a warning. A repeated message refreshes `last_added` instead
    /// of adding a duplicate entry.
    pub fn add(&mut self, message: impl Into<String>, now: DateTime<Utc>) {
        let message = message.into();
        self.drop_expired(now);
        if let Some(existing) = self.entries.iter_mut().find(|w| w.message == message) {
            existing.last_added = now;
            return;
        }
        self.entries.push(Warning {
            message,
            first_added: now,
            last_added: now,
            last_shown: None,
            expire_after_secs: DEFAULT_EXPIRE_AFTER_SECS,
            repeat_after_secs: DEFAULT_REPEAT_AFTER_SECS,
        });
    }

    /// Warnings currently eligible for display.
    pub fn pending(&self, now: DateTime<Utc>) -> Vec<&Warning> {
        self.entries
            .iter()
            .filter(|w| !w.expired(now) && w.pending(now))
            .collect()
    }

    /// Mark every pending warning as shown at `now`. Returns how many were
    /// marked.
    pub fn okay(&mut self, now: DateTime<Utc>) -> usize {
        let mut shown = 0;
        for w in &mut self.entries {
            if !w.expired(now) && w.pending(now) {
                w.last_shown = Some(now);
                shown += 1;
            }
        }
        shown
    }

    /// Drop warnings past their expiry window.
    pub fn drop_expired(&mut self, now: DateTime<Utc>) {
        self.entries.retain(|w| !w.expired(now));
    }

    pub fn has_expired(&self, now: DateTime<Utc>) -> bool {
        self.entries.iter().any(|w| w.expired(now))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Warning> {
        self.entries.iter()
    }
}

#[cfg(test)]
#[path = "warnings_tests.rs"]
mod tests;
