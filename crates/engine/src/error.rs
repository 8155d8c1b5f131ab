// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for the engine

use thiserror::Error;
use warden_state::StateError;

/// Errors a manager may surface from `startup`/`ensure`. The ensure loop
/// logs them and carries on; only startup errors abort.
pub type ManagerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur in the task runner
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("state error: {0}")]
    State(#[from] StateError),
}

/// Errors that can occur in the overlord
#[derive(Debug, Error)]
pub enum OverlordError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("state error: {0}")]
    State(#[from] StateError),
    #[error("runner error: {0}")]
    Runner(#[from] RunnerError),
    #[error("manager startup failed: {0}")]
    ManagerStartup(#[source] ManagerError),
    #[error("overlord already started")]
    AlreadyStarted,
}
