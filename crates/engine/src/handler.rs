// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Handler seams: the trait task handlers implement and the context they
//! receive.
//!
//! Handlers must not hold the state lock across an `.await`; the guard is
//! `!Send`, so a handler that tries will not compile.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use warden_core::{ChangeId, Outcome, TaskId};
use warden_state::{State, StateError, StateGuard};

use crate::clock::SharedClock;

/// A task handler for one direction (do, undo, or cleanup) of a task kind.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn run(&self, ctx: TaskContext) -> Outcome;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Outcome> + Send + 'static,
{
    async fn run(&self, ctx: TaskContext) -> Outcome {
        (self.0)(ctx).await
    }
}

/// Wrap an async closure as a [`Handler`].
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn Handler>
where
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Outcome> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Registered handlers for one task kind.
#[derive(Clone)]
pub struct HandlerSpec {
    pub do_handler: Arc<dyn Handler>,
    /// Missing undo means the task is trivially reverted
    pub undo_handler: Option<Arc<dyn Handler>>,
    /// Runs once per task after the owning change settles
    pub cleanup: Option<Arc<dyn Handler>>,
    /// Concurrent handlers of this kind; unlimited if unset
    pub max_concurrent: Option<usize>,
}

impl HandlerSpec {
    pub fn new(do_handler: Arc<dyn Handler>) -> Self {
        Self {
            do_handler,
            undo_handler: None,
            cleanup: None,
            max_concurrent: None,
        }
    }

    warden_core::setters! {
        option {
            undo_handler: Arc<dyn Handler>,
            cleanup: Arc<dyn Handler>,
            max_concurrent: usize,
        }
    }
}

/// Execution context handed to a handler.
///
/// Grants locked state access plus progress/log/spawn conveniences scoped
/// to the handler's task.
#[derive(Clone)]
pub struct TaskContext {
    pub(crate) state: Arc<State>,
    pub(crate) task_id: TaskId,
    pub(crate) change_id: ChangeId,
    pub(crate) token: CancellationToken,
    pub(crate) clock: Arc<dyn SharedClock>,
}

impl TaskContext {
    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn change_id(&self) -> &ChangeId {
        &self.change_id
    }

    /// Acquire the state lock.
    pub fn lock(&self) -> StateGuard<'_> {
        self.state.lock()
    }

    /// Run a closure under the state lock.
    ///
    /// The guard never crosses an `.await`, so this is the natural shape
    /// for the unlock-do-IO-relock pattern: lock, read what the I/O needs,
    /// release; do the I/O; lock again and re-check the world before
    /// applying results.
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut StateGuard<'_>) -> R) -> R {
        let mut guard = self.state.lock();
        f(&mut guard)
    }

    /// Record progress on this task.
    pub fn set_progress(&self, label: &str, done: u64, total: u64) {
        let mut guard = self.state.lock();
        if let Some(task) = guard.task_mut(&self.task_id) {
            task.set_progress(label, done, total);
        }
    }

    /// Append a timestamped entry to this task's log.
    pub fn log(&self, message: impl Into<String>) {
        let now = self.clock.wall();
        let mut guard = self.state.lock();
        if let Some(task) = guard.task_mut(&self.task_id) {
            task.log(now, message);
        }
    }

    /// Append a new task to this change. The new task joins the same lanes
    /// as the current one; ordering edges are the caller's to add.
    pub fn spawn_task(
        &self,
        kind: impl Into<String>,
        summary: impl Into<String>,
    ) -> Result<TaskId, StateError> {
        let mut guard = self.state.lock();
        let lanes = guard
            .task(&self.task_id)
            .map(|t| t.lanes.clone())
            .unwrap_or_default();
        let new_id = guard.new_task(&self.change_id, kind, summary)?;
        for lane in lanes {
            guard.join_lane(&new_id, lane)?;
        }
        Ok(new_id)
    }

    /// Declare this task's side effects fully applied, so a crash before
    /// the completion bookkeeping does not re-run the handler.
    pub fn mark_atomic_complete(&self) -> Result<(), StateError> {
        let mut guard = self.state.lock();
        match guard.task_mut(&self.task_id) {
            Some(task) => task.mark_atomic_complete(),
            None => Err(StateError::NoSuchTask(self.task_id.clone())),
        }
    }

    /// True once runner shutdown or a change abort asked this handler to
    /// stop cooperatively.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves when cancellation is requested.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }
}

#[cfg(test)]
#[path = "handler_tests.rs"]
mod tests;
