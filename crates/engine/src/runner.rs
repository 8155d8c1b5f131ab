// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The task runner.
//!
//! Each ensure pass first applies handler completions, then dispatches
//! ready tasks to their registered handlers. All status transitions happen
//! under the state lock, so the graph history is linearizable; handlers run
//! on the tokio pool and report back over a completion channel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use warden_core::{ChangeId, Clock, Outcome, TaskId, TaskStatus};
use warden_state::{NoticeType, State, StateGuard};

use crate::clock::SharedClock;
use crate::handler::{Handler, HandlerSpec, TaskContext};
use crate::RunnerError;

/// Data slot marking a task's cleanup as done.
const CLEAN_MARKER: &str = "clean";

/// Runner-wide limits.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Total concurrent handlers, all kinds together
    pub max_concurrent: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self { max_concurrent: 8 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Do,
    Undo,
    Cleanup,
}

/// View of an in-flight task handed to the blocked predicate.
#[derive(Debug, Clone)]
pub struct RunningTask {
    pub task_id: TaskId,
    pub kind: String,
    pub undo: bool,
}

struct Running {
    kind: String,
    direction: Direction,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

struct Completion {
    task_id: TaskId,
    direction: Direction,
    /// Err carries a captured panic message
    result: Result<Outcome, String>,
}

struct Candidate {
    task_id: TaskId,
    change_id: ChangeId,
    kind: String,
    direction: Direction,
}

type BlockedFn = Box<dyn Fn(&warden_state::Task, &[RunningTask]) -> bool + Send + Sync>;

/// Dispatches ready tasks to handlers with bounded concurrency.
pub struct TaskRunner {
    state: Arc<State>,
    clock: Arc<dyn SharedClock>,
    /// Poked on every handler completion so the ensure loop re-runs
    wake: Arc<Notify>,
    handlers: Mutex<HashMap<String, HandlerSpec>>,
    blocked: Mutex<Option<BlockedFn>>,
    running: Mutex<HashMap<TaskId, Running>>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: Mutex<mpsc::UnboundedReceiver<Completion>>,
    token: CancellationToken,
    max_concurrent: usize,
}

impl TaskRunner {
    pub fn new<C: Clock>(
        state: Arc<State>,
        clock: C,
        wake: Arc<Notify>,
        config: RunnerConfig,
    ) -> Self {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        Self {
            state,
            clock: Arc::new(clock),
            wake,
            handlers: Mutex::new(HashMap::new()),
            blocked: Mutex::new(None),
            running: Mutex::new(HashMap::new()),
            completions_tx,
            completions_rx: Mutex::new(completions_rx),
            token: CancellationToken::new(),
            max_concurrent: config.max_concurrent,
        }
    }

    /// Register the handlers for a task kind.
    pub fn add_handler(&self, kind: impl Into<String>, spec: HandlerSpec) {
        self.handlers.lock().insert(kind.into(), spec);
    }

    /// Install a predicate that can defer dispatch of a ready task given
    /// the currently running set (e.g. to serialize work per package).
    pub fn set_blocked_predicate(
        &self,
        predicate: impl Fn(&warden_state::Task, &[RunningTask]) -> bool + Send + Sync + 'static,
    ) {
        *self.blocked.lock() = Some(Box::new(predicate));
    }

    /// Number of handlers currently in flight.
    pub fn running_count(&self) -> usize {
        self.running.lock().len()
    }

    /// One runner pass: apply completions, then dispatch ready tasks.
    pub async fn ensure(&self) -> Result<(), RunnerError> {
        self.drain_completions();
        self.dispatch()
    }

    /// Cooperative shutdown: cancel all handler tokens and wait up to
    /// `timeout`. Returns the number of handlers still running; their tasks
    /// keep their in-flight status and resume on next process start.
    pub async fn stop(&self, timeout: Duration) -> usize {
        self.token.cancel();

        let handles: Vec<(TaskId, JoinHandle<()>)> = {
            let mut running = self.running.lock();
            running.drain().map(|(id, r)| (id, r.handle)).collect()
        };

        let deadline = tokio::time::Instant::now() + timeout;
        let mut stragglers = 0;
        for (task_id, handle) in handles {
            match tokio::time::timeout_at(deadline, handle).await {
                Ok(_) => {}
                Err(_) => {
                    stragglers += 1;
                    warn!(
                        task = %task_id,
                        "handler still running at shutdown; task will resume on next start"
                    );
                }
            }
        }

        // Handlers that finished inside the window have completions queued
        self.drain_completions();
        stragglers
    }

    // --- completion side ---

    fn drain_completions(&self) {
        let mut completions = Vec::new();
        {
            let mut rx = self.completions_rx.lock();
            while let Ok(completion) = rx.try_recv() {
                completions.push(completion);
            }
        }
        if completions.is_empty() {
            return;
        }

        let now = self.clock.wall();
        let mut guard = self.state.lock();
        let mut touched: Vec<ChangeId> = Vec::new();

        for completion in completions {
            self.running.lock().remove(&completion.task_id);
            self.apply_completion(&mut guard, completion, now, &mut touched);
        }

        guard.finalize_ready(now);
        for change_id in touched {
            guard.add_notice(NoticeType::ChangeUpdate, change_id.as_str(), now, None);
        }
        // Guard drop persists; a failed checkpoint rolls back and is logged
    }

    fn apply_completion(
        &self,
        guard: &mut StateGuard<'_>,
        completion: Completion,
        now: DateTime<Utc>,
        touched: &mut Vec<ChangeId>,
    ) {
        let Completion {
            task_id,
            direction,
            result,
        } = completion;

        let Some(task) = guard.task_mut(&task_id) else {
            return;
        };
        let change_id = task.change_id.clone();
        if !touched.contains(&change_id) {
            touched.push(change_id.clone());
        }

        if direction == Direction::Cleanup {
            if let Err(reason) = &result {
                warn!(task = %task_id, %reason, "cleanup handler failed");
            }
            if let Err(e) = task.data_set(CLEAN_MARKER, &true) {
                warn!(task = %task_id, error = %e, "cannot mark task clean");
            }
            return;
        }

        // Lane aborted while the handler was running
        let aborted_mid_run = task.status == TaskStatus::Abort;

        let failure = match result {
            Ok(Outcome::Success) => {
                task.status = if aborted_mid_run {
                    // Finished its work, so it now needs reverting
                    TaskStatus::Undo
                } else {
                    match direction {
                        Direction::Do => TaskStatus::Done,
                        _ => TaskStatus::Undone,
                    }
                };
                None
            }
            Ok(Outcome::Retry(after)) => {
                if aborted_mid_run {
                    // Never finished; nothing to revert
                    task.status = TaskStatus::Hold;
                } else {
                    task.status = match direction {
                        Direction::Do => TaskStatus::Do,
                        _ => TaskStatus::Undo,
                    };
                    let backoff = chrono::Duration::from_std(after)
                        .unwrap_or_else(|_| chrono::Duration::zero());
                    task.at_time = Some(now + backoff);
                    task.retry_count += 1;
                    guard.ensure_before(after);
                }
                None
            }
            Ok(Outcome::Wait) => {
                task.status = if aborted_mid_run {
                    TaskStatus::Hold
                } else {
                    TaskStatus::Wait
                };
                None
            }
            Ok(Outcome::Error(reason)) | Err(reason) => {
                task.log(now, format!("ERROR {reason}"));
                task.status = TaskStatus::Error;
                Some(direction)
            }
        };

        // A failed do-direction task aborts its lanes and wakes the undo
        // wavefront; a failed undo just stays Error.
        if failure == Some(Direction::Do) {
            guard.abort_task_lanes(&task_id);
            self.cancel_aborted_running(guard);
        }
    }

    /// Cancel tokens of running handlers whose task was just flagged Abort.
    fn cancel_aborted_running(&self, guard: &StateGuard<'_>) {
        let running = self.running.lock();
        for (task_id, running_task) in running.iter() {
            if guard.task(task_id).map(|t| t.status) == Some(TaskStatus::Abort) {
                running_task.token.cancel();
            }
        }
    }

    // --- dispatch side ---

    fn dispatch(&self) -> Result<(), RunnerError> {
        let now = self.clock.wall();
        let mut guard = self.state.lock();

        let mut candidates: Vec<Candidate> = Vec::new();
        let mut soonest: Option<DateTime<Utc>> = None;

        let change_ids: Vec<ChangeId> = guard.changes().map(|c| c.id.clone()).collect();
        for change_id in change_ids {
            let status = match guard.change_status(&change_id) {
                Ok(status) => status,
                Err(_) => continue,
            };
            let Some(change) = guard.change(&change_id) else {
                continue;
            };
            let task_ids = change.task_ids.clone();
            let aborted_lanes = change.aborted_lanes.clone();

            if status.is_terminal() {
                self.collect_cleanup(&guard, &task_ids, &change_id, &mut candidates);
                continue;
            }

            for task_id in task_ids {
                let Some(task) = guard.task(&task_id) else {
                    continue;
                };
                if self.running.lock().contains_key(&task_id) {
                    continue;
                }
                let direction = match task.status {
                    TaskStatus::Do => Direction::Do,
                    TaskStatus::Undo => Direction::Undo,
                    _ => continue,
                };
                if let Some(at) = task.at_time {
                    if at > now {
                        soonest = Some(soonest.map_or(at, |s: DateTime<Utc>| s.min(at)));
                        continue;
                    }
                }
                match direction {
                    Direction::Do => {
                        if task.in_any_lane(&aborted_lanes) || !guard.do_prereqs_met(task) {
                            continue;
                        }
                    }
                    Direction::Undo => {
                        if !guard.undo_prereqs_met(task) {
                            continue;
                        }
                    }
                    Direction::Cleanup => {}
                }
                candidates.push(Candidate {
                    task_id: task_id.clone(),
                    change_id: change_id.clone(),
                    kind: task.kind.clone(),
                    direction,
                });
            }
        }

        let to_start = self.admit(&mut guard, candidates, now);

        if let Some(at) = soonest {
            let wait = (at - now).to_std().unwrap_or_default();
            guard.ensure_before(wait);
        }
        guard.finalize_ready(now);
        guard.unlock()?;

        for (candidate, handler) in to_start {
            self.spawn(candidate, handler);
        }
        Ok(())
    }

    fn collect_cleanup(
        &self,
        guard: &StateGuard<'_>,
        task_ids: &[TaskId],
        change_id: &ChangeId,
        candidates: &mut Vec<Candidate>,
    ) {
        let handlers = self.handlers.lock();
        for task_id in task_ids {
            let Some(task) = guard.task(task_id) else {
                continue;
            };
            if handlers.get(&task.kind).is_none_or(|s| s.cleanup.is_none()) {
                continue;
            }
            if task
                .data_get::<bool>(CLEAN_MARKER)
                .ok()
                .flatten()
                .unwrap_or(false)
                || self.running.lock().contains_key(task_id)
            {
                continue;
            }
            candidates.push(Candidate {
                task_id: task_id.clone(),
                change_id: change_id.clone(),
                kind: task.kind.clone(),
                direction: Direction::Cleanup,
            });
        }
    }

    /// Apply the blocked predicate and concurrency limits, flip statuses,
    /// and return the handlers to start.
    fn admit(
        &self,
        guard: &mut StateGuard<'_>,
        candidates: Vec<Candidate>,
        now: DateTime<Utc>,
    ) -> Vec<(Candidate, Arc<dyn Handler>)> {
        let mut to_start: Vec<(Candidate, Arc<dyn Handler>)> = Vec::new();

        for candidate in candidates {
            let in_flight = self.running.lock().len() + to_start.len();
            if in_flight >= self.max_concurrent {
                debug!("runner at concurrency limit, deferring remaining tasks");
                break;
            }

            let spec = self.handlers.lock().get(&candidate.kind).cloned();
            match candidate.direction {
                Direction::Do => {
                    let Some(spec) = spec else {
                        // A do task without a handler can never make progress
                        if let Some(task) = guard.task_mut(&candidate.task_id) {
                            task.log(
                                now,
                                format!("ERROR no handler for task kind {:?}", candidate.kind),
                            );
                            task.status = TaskStatus::Error;
                        }
                        guard.abort_task_lanes(&candidate.task_id);
                        continue;
                    };
                    if self.is_blocked(guard, &candidate, &to_start)
                        || self.kind_saturated(&spec, &candidate.kind, &to_start)
                    {
                        continue;
                    }
                    if let Some(task) = guard.task_mut(&candidate.task_id) {
                        task.status = TaskStatus::Doing;
                    }
                    let handler = spec.do_handler.clone();
                    to_start.push((candidate, handler));
                }
                Direction::Undo => {
                    match spec.as_ref().and_then(|s| s.undo_handler.clone()) {
                        None => {
                            // Missing undo handler: trivially reverted
                            if let Some(task) = guard.task_mut(&candidate.task_id) {
                                task.status = TaskStatus::Undone;
                            }
                        }
                        Some(handler) => {
                            if let Some(spec) = &spec {
                                if self.kind_saturated(spec, &candidate.kind, &to_start) {
                                    continue;
                                }
                            }
                            if let Some(task) = guard.task_mut(&candidate.task_id) {
                                task.status = TaskStatus::Undoing;
                            }
                            to_start.push((candidate, handler));
                        }
                    }
                }
                Direction::Cleanup => {
                    if let Some(handler) = spec.and_then(|s| s.cleanup) {
                        to_start.push((candidate, handler));
                    }
                }
            }
        }

        to_start
    }

    fn is_blocked(
        &self,
        guard: &StateGuard<'_>,
        candidate: &Candidate,
        to_start: &[(Candidate, Arc<dyn Handler>)],
    ) -> bool {
        let blocked = self.blocked.lock();
        let Some(predicate) = &*blocked else {
            return false;
        };
        let Some(task) = guard.task(&candidate.task_id) else {
            return true;
        };
        // The predicate sees tasks admitted earlier in this batch too
        let mut running_view: Vec<RunningTask> = {
            let running = self.running.lock();
            running
                .iter()
                .map(|(id, r)| RunningTask {
                    task_id: id.clone(),
                    kind: r.kind.clone(),
                    undo: r.direction == Direction::Undo,
                })
                .collect()
        };
        running_view.extend(to_start.iter().map(|(c, _)| RunningTask {
            task_id: c.task_id.clone(),
            kind: c.kind.clone(),
            undo: c.direction == Direction::Undo,
        }));
        let deferred = predicate(task, &running_view);
        if deferred {
            debug!(task = %candidate.task_id, kind = %candidate.kind, "task deferred by blocked predicate");
        }
        deferred
    }

    fn kind_saturated(
        &self,
        spec: &HandlerSpec,
        kind: &str,
        to_start: &[(Candidate, Arc<dyn Handler>)],
    ) -> bool {
        let Some(limit) = spec.max_concurrent else {
            return false;
        };
        let running_of_kind = {
            let running = self.running.lock();
            running.values().filter(|r| r.kind == kind).count()
        };
        let starting_of_kind = to_start.iter().filter(|(c, _)| c.kind == kind).count();
        running_of_kind + starting_of_kind >= limit
    }

    fn spawn(&self, candidate: Candidate, handler: Arc<dyn Handler>) {
        let Candidate {
            task_id,
            change_id,
            kind,
            direction,
        } = candidate;

        let child = self.token.child_token();
        let ctx = TaskContext {
            state: Arc::clone(&self.state),
            task_id: task_id.clone(),
            change_id,
            token: child.clone(),
            clock: Arc::clone(&self.clock),
        };

        let completions_tx = self.completions_tx.clone();
        let wake = Arc::clone(&self.wake);
        let completed_id = task_id.clone();

        // The inner spawn isolates handler panics as JoinErrors
        let inner = tokio::spawn(async move { handler.run(ctx).await });
        let outer = tokio::spawn(async move {
            let result = match inner.await {
                Ok(outcome) => Ok(outcome),
                Err(e) if e.is_panic() => {
                    let payload = e.into_panic();
                    let message = payload
                        .downcast_ref::<&str>()
                        .map(|s| (*s).to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    error!(task = %completed_id, %message, "task handler panicked");
                    Err(format!("handler panicked: {message}"))
                }
                Err(_) => Err("handler aborted".to_string()),
            };
            let _ = completions_tx.send(Completion {
                task_id: completed_id,
                direction,
                result,
            });
            wake.notify_one();
        });

        self.running.lock().insert(
            task_id,
            Running {
                kind,
                direction,
                token: child,
                handle: outer,
            },
        );
    }
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;
