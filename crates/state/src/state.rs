// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The locked state store.
//!
//! `State::lock()` returns a guard; every read or mutation of the document
//! happens while the guard is held. Dropping a guard after mutations
//! checkpoints the document through the backend; a failed checkpoint rolls
//! the in-memory document back to the last persisted snapshot.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use tracing::error;
use warden_core::{ChangeId, ChangeStatus, RestartKind, TaskId};

use crate::prune::{prune_doc, PruneOptions};
use crate::{Backend, Change, Notice, NoticeType, StateDoc, StateError, Task, Warning};

struct Inner {
    doc: StateDoc,
    /// Per-key values that are never persisted (manager registries etc.)
    cache: HashMap<String, Box<dyn Any + Send>>,
    modified: bool,
    /// Copy of the document as of the last successful checkpoint, taken
    /// lazily at the first mutation of a lock session
    backup: Option<StateDoc>,
}

/// Process-wide state store. Share as `Arc<State>`.
pub struct State {
    backend: Arc<dyn Backend>,
    inner: Mutex<Inner>,
}

impl State {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self::from_doc(StateDoc::default(), backend)
    }

    pub fn from_doc(doc: StateDoc, backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            inner: Mutex::new(Inner {
                doc,
                cache: HashMap::new(),
                modified: false,
                backup: None,
            }),
        }
    }

    /// Acquire the exclusive state lock.
    pub fn lock(&self) -> StateGuard<'_> {
        StateGuard {
            backend: &*self.backend,
            inner: self.inner.lock(),
        }
    }
}

/// Exclusive access to the state document.
///
/// The guard is deliberately `!Send` (it wraps a `parking_lot` mutex
/// guard), so handlers cannot hold it across an `.await` point.
pub struct StateGuard<'a> {
    backend: &'a dyn Backend,
    inner: MutexGuard<'a, Inner>,
}

impl StateGuard<'_> {
    fn mark_modified(&mut self) {
        if !self.inner.modified {
            let snapshot = self.inner.doc.clone();
            self.inner.backup = Some(snapshot);
            self.inner.modified = true;
        }
    }

    // --- typed slots ---

    /// Typed read of a top-level data slot.
    pub fn get<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StateError> {
        self.inner.doc.data_get(key)
    }

    /// Typed write of a top-level data slot.
    pub fn set<T: Serialize>(&mut self, key: &str, value: &T) -> Result<(), StateError> {
        self.mark_modified();
        self.inner.doc.data_set(key, value)
    }

    /// Remove a top-level data slot.
    pub fn clear(&mut self, key: &str) {
        self.mark_modified();
        self.inner.doc.data.shift_remove(key);
    }

    // --- cache (never persisted) ---

    /// Install a cached value under `key`. Cached values are not written to
    /// disk and vanish on restart.
    pub fn cache<T: Send + 'static>(&mut self, key: impl Into<String>, value: T) {
        self.inner.cache.insert(key.into(), Box::new(value));
    }

    /// Fetch a cached value by key and type.
    pub fn cached<T: 'static>(&self, key: &str) -> Option<&T> {
        self.inner.cache.get(key).and_then(|v| v.downcast_ref())
    }

    // --- changes and tasks ---

    pub fn new_change(
        &mut self,
        kind: impl Into<String>,
        summary: impl Into<String>,
        now: DateTime<Utc>,
    ) -> ChangeId {
        self.mark_modified();
        self.inner.doc.new_change(kind, summary, now)
    }

    pub fn new_task(
        &mut self,
        change_id: &ChangeId,
        kind: impl Into<String>,
        summary: impl Into<String>,
    ) -> Result<TaskId, StateError> {
        self.mark_modified();
        self.inner.doc.new_task(change_id, kind, summary)
    }

    /// Add a halt edge: `after` runs only once `before` is ready.
    pub fn add_halt(&mut self, before: &TaskId, after: &TaskId) -> Result<(), StateError> {
        self.mark_modified();
        self.inner.doc.add_halt(before, after)
    }

    /// Mint a fresh lane in the given change.
    pub fn new_lane(&mut self, change_id: &ChangeId) -> Result<u64, StateError> {
        self.mark_modified();
        self.inner
            .doc
            .changes
            .get_mut(change_id.as_str())
            .map(Change::new_lane)
            .ok_or_else(|| StateError::NoSuchChange(change_id.clone()))
    }

    /// Tag a task as a member of the given lane.
    pub fn join_lane(&mut self, task_id: &TaskId, lane: u64) -> Result<(), StateError> {
        self.mark_modified();
        let task = self
            .inner
            .doc
            .tasks
            .get_mut(task_id.as_str())
            .ok_or_else(|| StateError::NoSuchTask(task_id.clone()))?;
        if !task.lanes.contains(&lane) {
            task.lanes.push(lane);
        }
        Ok(())
    }

    pub fn change(&self, id: &ChangeId) -> Option<&Change> {
        self.inner.doc.changes.get(id.as_str())
    }

    pub fn change_mut(&mut self, id: &ChangeId) -> Option<&mut Change> {
        self.mark_modified();
        self.inner.doc.changes.get_mut(id.as_str())
    }

    pub fn task(&self, id: &TaskId) -> Option<&Task> {
        self.inner.doc.tasks.get(id.as_str())
    }

    pub fn task_mut(&mut self, id: &TaskId) -> Option<&mut Task> {
        self.mark_modified();
        self.inner.doc.tasks.get_mut(id.as_str())
    }

    pub fn changes(&self) -> impl Iterator<Item = &Change> {
        self.inner.doc.changes.values()
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.inner.doc.tasks.values()
    }

    /// Derived status of a change.
    pub fn change_status(&self, id: &ChangeId) -> Result<ChangeStatus, StateError> {
        let change = self
            .change(id)
            .ok_or_else(|| StateError::NoSuchChange(id.clone()))?;
        Ok(self.inner.doc.change_status(change))
    }

    /// Consolidated error text for a change, if any task failed.
    pub fn err_summary(&self, id: &ChangeId) -> Option<String> {
        let change = self.change(id)?;
        self.inner.doc.err_summary(change)
    }

    /// Abort the lanes the given task belongs to, across its change.
    pub fn abort_task_lanes(&mut self, task_id: &TaskId) {
        self.mark_modified();
        self.inner.doc.abort_task_lanes(task_id);
    }

    /// Abort a whole change; completed tasks become undo candidates.
    pub fn abort_change(&mut self, change_id: &ChangeId) {
        self.mark_modified();
        self.inner.doc.abort_change(change_id);
    }

    /// Aggregate `(done, total)` progress over a change's tasks.
    pub fn change_progress(&self, id: &ChangeId) -> Result<(u64, u64), StateError> {
        let change = self
            .change(id)
            .ok_or_else(|| StateError::NoSuchChange(id.clone()))?;
        Ok(self.inner.doc.change_progress(change))
    }

    pub fn do_prereqs_met(&self, task: &Task) -> bool {
        self.inner.doc.do_prereqs_met(task)
    }

    pub fn undo_prereqs_met(&self, task: &Task) -> bool {
        self.inner.doc.undo_prereqs_met(task)
    }

    /// Stamp `ready_time` on changes that just became terminal.
    pub fn finalize_ready(&mut self, now: DateTime<Utc>) {
        self.mark_modified();
        self.inner.doc.finalize_ready(now);
    }

    // --- warnings and notices ---

    /// Record a user-visible warning.
    pub fn add_warning(&mut self, message: impl Into<String>, now: DateTime<Utc>) {
        self.mark_modified();
        self.inner.doc.warnings.add(message, now);
    }

    pub fn pending_warnings(&self, now: DateTime<Utc>) -> Vec<Warning> {
        self.inner
            .doc
            .warnings
            .pending(now)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Mark pending warnings as shown; returns how many were marked.
    pub fn okay_warnings(&mut self, now: DateTime<Utc>) -> usize {
        self.mark_modified();
        self.inner.doc.warnings.okay(now)
    }

    /// Record a notice occurrence; coalesces by (type, key).
    pub fn add_notice(
        &mut self,
        notice_type: NoticeType,
        key: impl Into<String>,
        now: DateTime<Utc>,
        repeat_after: Option<Duration>,
    ) -> String {
        self.mark_modified();
        let inner = &mut *self.inner;
        let counter = &mut inner.doc.last_notice_id;
        inner.doc.notices.record(
            notice_type,
            key,
            now,
            repeat_after,
            IndexMap::new(),
            move || {
                *counter += 1;
                *counter
            },
        )
    }

    pub fn notices(&self, notice_type: Option<NoticeType>) -> Vec<Notice> {
        self.inner
            .doc
            .notices
            .query(notice_type)
            .into_iter()
            .cloned()
            .collect()
    }

    // --- housekeeping ---

    /// Remove abandoned terminal changes together with their tasks, and
    /// drop expired warnings and notices. A no-op pass does not dirty the
    /// state, so idle ensure pulses skip the checkpoint.
    pub fn prune(&mut self, now: DateTime<Utc>, opts: &PruneOptions) {
        let doc = &self.inner.doc;
        let untouched = crate::prune::collect_doomed(doc, now, opts).is_empty()
            && !doc.warnings.has_expired(now)
            && !doc.notices.has_expired(now);
        if untouched {
            return;
        }
        self.mark_modified();
        prune_doc(&mut self.inner.doc, now, opts);
    }

    // --- backend pass-through ---

    /// Request that the ensure loop fires within the given bound.
    pub fn ensure_before(&self, d: Duration) {
        self.backend.ensure_before(d);
    }

    /// Request a restart of the host.
    pub fn request_restart(&self, kind: RestartKind) {
        self.backend.request_restart(kind);
    }

    // --- persistence ---

    /// Release the lock, checkpointing the document if it was modified.
    ///
    /// On checkpoint failure the in-memory document reverts to the last
    /// persisted snapshot and `StateError::Persistence` is returned.
    pub fn unlock(mut self) -> Result<(), StateError> {
        self.checkpoint_if_modified()
    }

    fn checkpoint_if_modified(&mut self) -> Result<(), StateError> {
        if !self.inner.modified {
            return Ok(());
        }

        let bytes = match serde_json::to_vec(&self.inner.doc) {
            Ok(bytes) => bytes,
            Err(e) => {
                // Undecodable documents cannot happen with well-formed slot
                // values; treat as a persistence failure and roll back.
                self.rollback();
                return Err(StateError::Persistence(std::io::Error::other(e)));
            }
        };

        match self.backend.checkpoint(&bytes) {
            Ok(()) => {
                self.inner.modified = false;
                self.inner.backup = None;
                Ok(())
            }
            Err(e) => {
                self.rollback();
                Err(StateError::Persistence(e))
            }
        }
    }

    fn rollback(&mut self) {
        if let Some(backup) = self.inner.backup.take() {
            self.inner.doc = backup;
        }
        self.inner.modified = false;
    }
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.checkpoint_if_modified() {
            error!(error = %e, "state checkpoint failed on unlock; in-memory state rolled back");
        }
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
