// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The overlord: periodic driver for managers and the task runner.
//!
//! A single loop task waits for the ensure interval, an `ensure_before`
//! request, or shutdown; each pulse calls every manager's `ensure` in
//! registration order and then runs one runner pass. Manager errors are
//! logged and never abort the loop.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use warden_core::{Clock, RestartKind};
use warden_state::{load_document, Backend, FileBackend, PruneOptions, State, StateDoc};

use crate::error::ManagerError;
use crate::runner::{RunnerConfig, TaskRunner};
use crate::OverlordError;

/// A subsystem driven by the overlord.
#[async_trait]
pub trait StateManager: Send + Sync {
    /// Called once before the loop starts, in registration order.
    async fn startup(&self) -> Result<(), ManagerError> {
        Ok(())
    }

    /// Called on every ensure pulse. Errors are logged, not fatal.
    async fn ensure(&self) -> Result<(), ManagerError>;

    /// Called once on shutdown, in reverse registration order.
    async fn stop(&self) {}
}

/// Overlord tuning knobs.
#[derive(Debug, Clone)]
pub struct OverlordConfig {
    /// Path of the persisted `state.json`
    pub state_path: PathBuf,
    /// Upper bound between ensure pulses
    pub ensure_interval: Duration,
    /// How long `stop` waits for in-flight handlers
    pub stop_timeout: Duration,
    pub prune: PruneOptions,
    pub runner: RunnerConfig,
}

impl OverlordConfig {
    pub fn new(state_path: impl Into<PathBuf>) -> Self {
        Self {
            state_path: state_path.into(),
            ensure_interval: Duration::from_secs(5 * 60),
            stop_timeout: Duration::from_secs(5),
            prune: PruneOptions::default(),
            runner: RunnerConfig::default(),
        }
    }

    warden_core::setters! {
        set {
            ensure_interval: Duration,
            stop_timeout: Duration,
            prune: PruneOptions,
            runner: RunnerConfig,
        }
    }
}

/// Backend wiring the state store into the overlord loop: checkpoints go
/// to the state file, `ensure_before` pokes the loop, restart requests are
/// delivered to the host after the current iteration.
struct OverlordBackend {
    file: FileBackend,
    wake: Arc<Notify>,
    next_ensure: Mutex<Option<Instant>>,
    /// Delivered over `restart_tx` only once the current iteration finishes
    pending_restart: Mutex<Option<RestartKind>>,
    restart_tx: mpsc::UnboundedSender<RestartKind>,
}

impl Backend for OverlordBackend {
    fn checkpoint(&self, data: &[u8]) -> std::io::Result<()> {
        self.file.checkpoint(data)
    }

    fn ensure_before(&self, d: Duration) {
        let at = Instant::now() + d;
        let mut next = self.next_ensure.lock();
        if next.map_or(true, |current| at < current) {
            *next = Some(at);
            self.wake.notify_one();
        }
    }

    fn request_restart(&self, kind: RestartKind) {
        info!(%kind, "restart requested");
        *self.pending_restart.lock() = Some(kind);
        self.wake.notify_one();
    }
}

/// The periodic driver owning the state, the runner, and the managers.
pub struct Overlord {
    state: Arc<State>,
    runner: Arc<TaskRunner>,
    managers: Mutex<Vec<Arc<dyn StateManager>>>,
    backend: Arc<OverlordBackend>,
    wake: Arc<Notify>,
    restart_rx: Mutex<Option<mpsc::UnboundedReceiver<RestartKind>>>,
    token: CancellationToken,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
    clock: Arc<dyn crate::clock::SharedClock>,
    config: OverlordConfig,
}

impl Overlord {
    /// Load (or initialize) the persisted state and build the overlord.
    ///
    /// Tasks found mid-flight in the loaded document are rewound to their
    /// queued status so interrupted work is re-dispatched, unless they
    /// marked themselves atomic-complete.
    pub fn new<C: Clock>(config: OverlordConfig, clock: C) -> Result<Self, OverlordError> {
        let mut doc = load_document(&config.state_path)?.unwrap_or_default();
        let reset = doc.reset_in_flight();
        if reset > 0 {
            info!(count = reset, "rewound in-flight tasks from previous run");
        }
        Self::with_doc(doc, config, clock)
    }

    /// Build an overlord over an explicit document (used by recovery tests
    /// and callers that pre-process the document).
    pub fn with_doc<C: Clock>(
        doc: StateDoc,
        config: OverlordConfig,
        clock: C,
    ) -> Result<Self, OverlordError> {
        let wake = Arc::new(Notify::new());
        let (restart_tx, restart_rx) = mpsc::unbounded_channel();

        let backend = Arc::new(OverlordBackend {
            file: FileBackend::new(&config.state_path),
            wake: Arc::clone(&wake),
            next_ensure: Mutex::new(None),
            pending_restart: Mutex::new(None),
            restart_tx,
        });

        let state_backend: Arc<dyn Backend> = backend.clone();
        let state = Arc::new(State::from_doc(doc, state_backend));
        let runner = Arc::new(TaskRunner::new(
            Arc::clone(&state),
            clock.clone(),
            Arc::clone(&wake),
            config.runner.clone(),
        ));

        Ok(Self {
            state,
            runner,
            managers: Mutex::new(Vec::new()),
            backend,
            wake,
            restart_rx: Mutex::new(Some(restart_rx)),
            token: CancellationToken::new(),
            loop_handle: Mutex::new(None),
            clock: Arc::new(clock),
            config,
        })
    }

    pub fn state(&self) -> Arc<State> {
        Arc::clone(&self.state)
    }

    pub fn runner(&self) -> Arc<TaskRunner> {
        Arc::clone(&self.runner)
    }

    pub fn state_path(&self) -> &Path {
        &self.config.state_path
    }

    /// Register a manager. Managers are driven in registration order.
    pub fn add_manager(&self, manager: Arc<dyn StateManager>) {
        self.managers.lock().push(manager);
    }

    /// Take the channel on which restart requests are delivered.
    pub fn restart_requests(&self) -> Option<mpsc::UnboundedReceiver<RestartKind>> {
        self.restart_rx.lock().take()
    }

    /// Ask the loop to run an ensure pass as soon as possible.
    pub fn ensure_soon(&self) {
        self.backend.ensure_before(Duration::ZERO);
    }

    /// Run every manager's `startup`, then start the loop task.
    pub async fn start(self: &Arc<Self>) -> Result<(), OverlordError> {
        if self.loop_handle.lock().is_some() {
            return Err(OverlordError::AlreadyStarted);
        }

        let managers: Vec<Arc<dyn StateManager>> = self.managers.lock().clone();
        for manager in &managers {
            manager
                .startup()
                .await
                .map_err(OverlordError::ManagerStartup)?;
        }

        let overlord = Arc::clone(self);
        let handle = tokio::spawn(async move { overlord.run_loop().await });
        *self.loop_handle.lock() = Some(handle);

        // First pulse right away so recovered work resumes without waiting
        // a full interval
        self.ensure_soon();
        Ok(())
    }

    async fn run_loop(&self) {
        info!(
            interval_secs = self.config.ensure_interval.as_secs(),
            "ensure loop started"
        );

        loop {
            let deadline = {
                let interval_deadline = Instant::now() + self.config.ensure_interval;
                let next = self.backend.next_ensure.lock();
                match *next {
                    Some(at) if at < interval_deadline => at,
                    _ => interval_deadline,
                }
            };

            tokio::select! {
                _ = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)) => {}
                _ = self.wake.notified() => {
                    // A sooner deadline, a completion, or a restart request;
                    // recompute unless an ensure is already due
                    let due = self
                        .backend
                        .next_ensure
                        .lock()
                        .map_or(false, |at| at <= Instant::now());
                    let restart_pending = self.backend.pending_restart.lock().is_some();
                    if !due && !restart_pending {
                        continue;
                    }
                }
                _ = self.token.cancelled() => break,
            }

            *self.backend.next_ensure.lock() = None;
            self.ensure_pass().await;

            // Restart requests are signalled only after a full iteration
            let pending = self.backend.pending_restart.lock().take();
            if let Some(kind) = pending {
                let _ = self.backend.restart_tx.send(kind);
            }
        }

        info!("ensure loop stopped");
    }

    /// One pulse: managers in order, then the runner, then housekeeping.
    async fn ensure_pass(&self) {
        let managers: Vec<Arc<dyn StateManager>> = self.managers.lock().clone();
        for manager in managers {
            if let Err(e) = manager.ensure().await {
                error!(error = %e, "manager ensure failed");
            }
        }

        if let Err(e) = self.runner.ensure().await {
            error!(error = %e, "runner ensure failed");
        }

        let now = self.clock.wall();
        let mut guard = self.state.lock();
        guard.prune(now, &self.config.prune);
        if let Err(e) = guard.unlock() {
            error!(error = %e, "state checkpoint failed during ensure");
        }
    }

    /// Stop the loop, the managers (reverse order), and the runner.
    pub async fn stop(&self) {
        self.token.cancel();
        self.wake.notify_one();

        let handle = self.loop_handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "ensure loop task failed");
            }
        }

        let managers: Vec<Arc<dyn StateManager>> = {
            let managers = self.managers.lock();
            managers.iter().rev().cloned().collect()
        };
        for manager in managers {
            manager.stop().await;
        }

        let stragglers = self.runner.stop(self.config.stop_timeout).await;
        if stragglers > 0 {
            info!(count = stragglers, "handlers left running; their tasks resume on next start");
        }
    }
}

#[cfg(test)]
#[path = "overlord_tests.rs"]
mod tests;
