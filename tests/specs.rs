//! Behavioral specifications for the warden engine.
//!
//! These tests drive a real overlord over a file-backed state directory
//! and verify the crash-safe orchestration contract end to end.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

#[path = "specs/prelude.rs"]
mod prelude;

// engine/
#[path = "specs/engine/chain.rs"]
mod engine_chain;
#[path = "specs/engine/conflict.rs"]
mod engine_conflict;
#[path = "specs/engine/resume.rs"]
mod engine_resume;
#[path = "specs/engine/retry.rs"]
mod engine_retry;
#[path = "specs/engine/undo.rs"]
mod engine_undo;

// state/
#[path = "specs/state/persistence.rs"]
mod state_persistence;

// locks/
#[path = "specs/locks/inhibit.rs"]
mod locks_inhibit;
