// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Change entity: a top-level unit of system work composed of tasks.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use warden_core::{ChangeId, TaskId};

use crate::StateError;

/// A change instance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Change {
    pub id: ChangeId,
    pub kind: String,
    pub summary: String,
    pub spawn_time: DateTime<Utc>,
    /// Set once, when the change first becomes terminal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub data: IndexMap<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub task_ids: Vec<TaskId>,
    /// Highest lane number handed out by `new_lane`
    #[serde(default)]
    pub lane_counter: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aborted_lanes: Vec<u64>,
}

impl Change {
    pub fn new(
        id: ChangeId,
        kind: impl Into<String>,
        summary: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            kind: kind.into(),
            summary: summary.into(),
            spawn_time: now,
            ready_time: None,
            data: IndexMap::new(),
            task_ids: Vec::new(),
            lane_counter: 0,
            aborted_lanes: Vec::new(),
        }
    }

    /// Mint a fresh lane number. Lane 0 is the implicit default lane every
    /// untagged task belongs to; explicit lanes start at 1.
    pub fn new_lane(&mut self) -> u64 {
        self.lane_counter += 1;
        self.lane_counter
    }

    pub fn is_lane_aborted(&self, lane: u64) -> bool {
        self.aborted_lanes.contains(&lane)
    }

    pub fn mark_lanes_aborted(&mut self, lanes: &[u64]) {
        for lane in lanes {
            if !self.aborted_lanes.contains(lane) {
                self.aborted_lanes.push(*lane);
            }
        }
    }

    /// Typed read of a change data slot.
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

    /// Typed write of a change data slot.
    pub fn data_set<T: Serialize>(&mut self, key: &str, value: &T) -> Result<(), StateError> {
        let value = serde_json::to_value(value).map_err(|source| StateError::Encode {
            key: key.to_string(),
            source,
        })?;
        self.data.insert(key.to_string(), value);
        Ok(())
    }
}

#[cfg(test)]
#[path = "change_tests.rs"]
mod tests;
