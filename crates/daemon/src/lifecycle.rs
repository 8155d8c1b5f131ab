// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle management: configuration, startup, shutdown.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};
use warden_core::SystemClock;
use warden_engine::{Overlord, OverlordConfig};
use warden_locks::{FileLock, InhibitDir, LockError};
use warden_state::PruneOptions;

use crate::env;

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Root state directory (e.g. ~/.local/state/warden)
    pub state_dir: PathBuf,
    /// Path to the persisted state document
    pub state_path: PathBuf,
    /// Path to lock/PID file
    pub lock_path: PathBuf,
    /// Path to daemon log file
    pub log_path: PathBuf,
    /// Directory for run-inhibition hint files
    pub inhibit_dir: PathBuf,
    /// Directory for per-package named locks
    pub run_lock_dir: PathBuf,
    /// Upper bound between ensure pulses
    pub ensure_interval: Duration,
    /// Pruning policy for abandoned changes
    pub prune: PruneOptions,
}

/// Optional `warden.toml` knobs under the state dir.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    ensure_interval_secs: Option<u64>,
    abandon_age_days: Option<u64>,
    max_changes: Option<usize>,
}

impl Config {
    /// Load configuration: fixed paths under the state dir, tuning knobs
    /// from `warden.toml` when present, env vars override.
    pub fn load() -> Result<Self, LifecycleError> {
        let state_dir = env::state_dir()?;
        let file_config = Self::read_file_config(&state_dir.join("warden.toml"))?;

        let mut prune = PruneOptions::default();
        if let Some(days) = file_config.abandon_age_days {
            prune.abandon_age = Duration::from_secs(days * 24 * 60 * 60);
        }
        if let Some(max) = file_config.max_changes {
            prune.max_changes = max;
        }

        let ensure_interval = env::ensure_interval()
            .or_else(|| file_config.ensure_interval_secs.map(Duration::from_secs))
            .unwrap_or(Duration::from_secs(5 * 60));

        Ok(Self {
            state_path: state_dir.join("state.json"),
            lock_path: state_dir.join("wardend.pid"),
            log_path: state_dir.join("wardend.log"),
            inhibit_dir: state_dir.join("inhibit"),
            run_lock_dir: state_dir.join("lock"),
            ensure_interval,
            prune,
            state_dir,
        })
    }

    fn read_file_config(path: &std::path::Path) -> Result<FileConfig, LifecycleError> {
        if !path.exists() {
            return Ok(FileConfig::default());
        }
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| LifecycleError::BadConfig(path.to_owned(), e))
    }
}

/// Running daemon state.
pub struct DaemonState {
    pub config: Config,
    // NOTE(lifetime): Held to maintain the exclusive singleton lock;
    // released on drop
    #[allow(dead_code)]
    lock: FileLock,
    pub overlord: Arc<Overlord>,
    /// Run-inhibition store, shared on disk with package launchers
    pub inhibit: InhibitDir,
}

impl std::fmt::Debug for DaemonState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaemonState")
            .field("config", &self.config)
            .field("inhibit", &self.inhibit)
            .finish_non_exhaustive()
    }
}

/// Lifecycle errors
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Could not determine state directory")]
    NoStateDir,

    #[error("Failed to acquire lock: daemon already running?")]
    LockFailed(#[source] LockError),

    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    #[error("Bad config file {0}: {1}")]
    BadConfig(PathBuf, #[source] toml::de::Error),

    #[error("State error: {0}")]
    State(#[from] warden_state::StateError),

    #[error("Overlord error: {0}")]
    Overlord(#[from] warden_engine::OverlordError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Start the daemon: acquire the singleton lock, recover state, build and
/// start the overlord.
pub async fn startup(config: &Config) -> Result<DaemonState, LifecycleError> {
    std::fs::create_dir_all(&config.state_dir)?;

    // Acquire the singleton lock FIRST so two daemons never race on state.
    // The lock file doubles as PID file; opened without truncation so a
    // losing contender does not wipe the winner's PID.
    let mut lock = FileLock::open(&config.lock_path)?;
    lock.try_lock_exclusive()
        .map_err(LifecycleError::LockFailed)?;

    // Write the PID now that the lock is held
    lock.write_string(&format!("{}\n", std::process::id()))?;

    std::fs::create_dir_all(&config.inhibit_dir)?;
    let inhibit = InhibitDir::new(&config.inhibit_dir);
    info!(
        inhibit = %config.inhibit_dir.display(),
        run_locks = %config.run_lock_dir.display(),
        "lock directories ready"
    );

    let overlord_config = OverlordConfig::new(&config.state_path)
        .ensure_interval(config.ensure_interval)
        .prune(config.prune.clone());
    let overlord = Arc::new(Overlord::new(overlord_config, SystemClock)?);

    // Managers are registered here by the subsystems linked into the
    // daemon before the loop starts.
    overlord.start().await?;

    info!(
        state = %config.state_path.display(),
        interval_secs = config.ensure_interval.as_secs(),
        "daemon started"
    );

    Ok(DaemonState {
        config: config.clone(),
        lock,
        overlord,
        inhibit,
    })
}

impl DaemonState {
    /// Shutdown gracefully: stop the overlord (final checkpoint included),
    /// then drop the PID file.
    pub async fn shutdown(self) {
        info!("shutting down daemon...");
        self.overlord.stop().await;

        if let Err(e) = std::fs::remove_file(&self.config.lock_path) {
            warn!(error = %e, "failed to remove PID file");
        }
        // The singleton lock is released when self.lock drops

        info!("daemon shutdown complete");
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
