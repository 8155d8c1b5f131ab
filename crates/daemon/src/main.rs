// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Warden Daemon (wardend)
//!
//! Background process that owns the persistent state and drives the task
//! orchestration engine.
//!
//! Architecture:
//! - Overlord loop: periodic driver for managers and the task runner
//! - Main task: signal handling and the restart protocol

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod env;
mod lifecycle;

use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};
use warden_core::RestartKind;

use crate::lifecycle::{Config, LifecycleError};

/// Exit code asking the supervisor to start us again.
const EXIT_RESTART: i32 = 42;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Handle info flags before any config/lock acquisition
    if let Some(arg) = std::env::args().nth(1) {
        match arg.as_str() {
            "--version" | "-V" | "-v" => {
                println!("wardend {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" | "-h" | "help" => {
                println!("wardend {}", env!("CARGO_PKG_VERSION"));
                println!("Warden Daemon - owns the persistent state and runs system changes");
                println!();
                println!("USAGE:");
                println!("    wardend");
                println!();
                println!("State lives under $WARDEN_STATE_DIR (default:");
                println!("~/.local/state/warden). Tuning knobs are read from");
                println!("warden.toml in that directory.");
                println!();
                println!("OPTIONS:");
                println!("    -h, --help       Print help information");
                println!("    -v, --version    Print version information");
                return Ok(());
            }
            _ => {
                eprintln!("error: unexpected argument '{arg}'");
                eprintln!("Usage: wardend [--help | --version]");
                std::process::exit(1);
            }
        }
    }

    let config = Config::load()?;

    // Rotate log file if it has grown too large
    rotate_log_if_needed(&config.log_path);

    let log_guard = setup_logging(&config)?;

    info!("starting wardend");

    let daemon = match lifecycle::startup(&config).await {
        Ok(daemon) => daemon,
        Err(LifecycleError::LockFailed(_)) => {
            // Another daemon holds the singleton lock; report it nicely
            let pid = std::fs::read_to_string(&config.lock_path)
                .unwrap_or_default()
                .trim()
                .to_string();
            eprintln!("wardend is already running");
            if !pid.is_empty() {
                eprintln!("  pid: {pid}");
            }
            std::process::exit(1);
        }
        Err(e) => {
            error!("failed to start daemon: {}", e);
            drop(log_guard);
            return Err(e.into());
        }
    };

    let mut restarts = daemon
        .overlord
        .restart_requests()
        .unwrap_or_else(|| tokio::sync::mpsc::unbounded_channel().1);

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    info!("daemon ready");

    // Signal ready for the parent process (e.g. systemd, test harness)
    println!("READY");

    let restart = tokio::select! {
        _ = sigterm.recv() => {
            info!("received SIGTERM, shutting down...");
            None
        }
        _ = sigint.recv() => {
            info!("received SIGINT, shutting down...");
            None
        }
        kind = restarts.recv() => kind,
    };

    daemon.shutdown().await;
    info!("daemon stopped");

    if let Some(kind) = restart {
        return handle_restart(kind);
    }
    Ok(())
}

/// Act on a restart request delivered by the overlord.
///
/// `daemon` and `socket` exit with a distinct code for the supervisor to
/// start us again; power-management kinds are the host integration's job,
/// so they are logged and exit cleanly.
fn handle_restart(kind: RestartKind) -> Result<(), Box<dyn std::error::Error>> {
    match kind {
        RestartKind::Daemon | RestartKind::Socket => {
            info!(%kind, "exiting for restart");
            std::process::exit(EXIT_RESTART);
        }
        RestartKind::System | RestartKind::Halt | RestartKind::Poweroff => {
            info!(%kind, "host restart requested; deferring to the system integration");
            Ok(())
        }
    }
}

/// Maximum log file size before rotation (10 MB).
const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Number of rotated log files to keep (wardend.log.1, .2, .3).
const MAX_ROTATED_LOGS: u32 = 3;

/// Rotate the daemon log file if it exceeds [`MAX_LOG_SIZE`].
///
/// Shifts `wardend.log` → `wardend.log.1` → `.2` → `.3`, deleting the
/// oldest. Best-effort: rotation failures are silently ignored so the
/// daemon still starts.
fn rotate_log_if_needed(log_path: &std::path::Path) {
    let size = match std::fs::metadata(log_path) {
        Ok(m) => m.len(),
        Err(_) => return,
    };

    if size < MAX_LOG_SIZE {
        return;
    }

    let log_str = log_path.display().to_string();

    for i in (1..MAX_ROTATED_LOGS).rev() {
        let from = format!("{log_str}.{i}");
        let to = format!("{log_str}.{}", i + 1);
        let _ = std::fs::rename(&from, &to);
    }

    let _ = std::fs::rename(log_path, format!("{log_str}.1"));
}

fn setup_logging(
    config: &Config,
) -> Result<tracing_appender::non_blocking::WorkerGuard, LifecycleError> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    if let Some(parent) = config.log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Size-based rotation happens at startup via rotate_log_if_needed
    let file_appender = tracing_appender::rolling::never(
        config.log_path.parent().ok_or(LifecycleError::NoStateDir)?,
        config
            .log_path
            .file_name()
            .ok_or(LifecycleError::NoStateDir)?,
    );
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking))
        .init();

    Ok(guard)
}

#[cfg(test)]
#[path = "main_tests.rs"]
mod tests;
