// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Notices: coalesced cross-change observations keyed by (type, key).
//!
//! Re-recording an existing notice bumps `last_occurred` and the occurrence
//! count; `last_repeated` only moves once the repeat window has passed, so
//! pollers keyed on it see one wakeup per window.

use chrono::{DateTime, Duration, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Default time before an unrepeated notice is dropped (7 days).
pub const DEFAULT_NOTICE_EXPIRE_SECS: u64 = 7 * 24 * 60 * 60;

/// Kind of a notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NoticeType {
    /// A change's status moved; key is the change ID
    ChangeUpdate,
    /// A warning was recorded; key is the warning message
    Warning,
    /// A package refresh is being held back; key is the package name
    RefreshInhibit,
}

warden_core::simple_display! {
    NoticeType {
        ChangeUpdate => "change-update",
        Warning => "warning",
        RefreshInhibit => "refresh-inhibit",
    }
}

/// A single notice entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Notice {
    pub id: String,
    #[serde(rename = "type")]
    pub notice_type: NoticeType,
    pub key: String,
    pub first_occurred: DateTime<Utc>,
    pub last_occurred: DateTime<Utc>,
    pub last_repeated: DateTime<Utc>,
    pub occurrences: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_after_secs: Option<u64>,
    pub expire_after_secs: u64,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub data: IndexMap<String, String>,
}

impl Notice {
    fn expired(&self, now: DateTime<Utc>) -> bool {
        self.last_occurred + Duration::seconds(self.expire_after_secs as i64) <= now
    }
}

/// The notice store held by the state document.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Notices {
    entries: Vec<Notice>,
}

impl Notices {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Record a notice occurrence. `next_id` is called only when a new
    /// entry is created, so IDs stay monotonic with the state counters.
    /// Returns the notice ID.
    pub fn record(
        &mut self,
        notice_type: NoticeType,
        key: impl Into<String>,
        now: DateTime<Utc>,
        repeat_after: Option<std::time::Duration>,
        data: IndexMap<String, String>,
        next_id: impl FnOnce() -> u64,
    ) -> String {
        let key = key.into();
        self.drop_expired(now);

        if let Some(existing) = self
            .entries
            .iter_mut()
            .find(|n| n.notice_type == notice_type && n.key == key)
        {
            existing.last_occurred = now;
            existing.occurrences += 1;
            if !data.is_empty() {
                existing.data = data;
            }
            let window = existing
                .repeat_after_secs
                .map(|s| Duration::seconds(s as i64))
                .unwrap_or_else(Duration::zero);
            if existing.last_repeated + window <= now {
                existing.last_repeated = now;
            }
            return existing.id.clone();
        }

        let id = next_id().to_string();
        self.entries.push(Notice {
            id: id.clone(),
            notice_type,
            key,
            first_occurred: now,
            last_occurred: now,
            last_repeated: now,
            occurrences: 1,
            repeat_after_secs: repeat_after.map(|d| d.as_secs()),
            expire_after_secs: DEFAULT_NOTICE_EXPIRE_SECS,
            data,
        });
        id
    }

    /// Notices of the given type (or all), sorted by `last_repeated`.
    pub fn query(&self, notice_type: Option<NoticeType>) -> Vec<&Notice> {
        let mut result: Vec<&Notice> = self
            .entries
            .iter()
            .filter(|n| notice_type.is_none_or(|t| n.notice_type == t))
            .collect();
        result.sort_by_key(|n| n.last_repeated);
        result
    }

    /// Drop notices past their expiry window.
    pub fn drop_expired(&mut self, now: DateTime<Utc>) {
        self.entries.retain(|n| !n.expired(now));
    }

    pub fn has_expired(&self, now: DateTime<Utc>) -> bool {
        self.entries.iter().any(|n| n.expired(now))
    }
}

#[cfg(test)]
#[path = "notices_tests.rs"]
mod tests;
