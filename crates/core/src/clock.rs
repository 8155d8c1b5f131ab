// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Clock abstraction for testable time handling

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A clock that provides the current time.
///
/// `now` is monotonic and used for scheduling decisions; `wall` is the
/// wall-clock time persisted in timestamps (spawn/ready times, task logs,
/// warnings, notices).
pub trait Clock: Clone + Send + Sync + 'static {
    fn now(&self) -> Instant;
    fn wall(&self) -> DateTime<Utc>;
}

/// Real system clock
#[derive(Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wall(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Fake clock for testing with controllable time
#[derive(Clone)]
pub struct FakeClock {
    current: Arc<Mutex<Instant>>,
    wall: Arc<Mutex<DateTime<Utc>>>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            current: Arc::new(Mutex::new(Instant::now())),
            // Arbitrary fixed epoch so test timestamps are deterministic
            wall: Arc::new(Mutex::new(
                Utc.timestamp_opt(1_700_000_000, 0)
                    .single()
                    .unwrap_or_default(),
            )),
        }
    }

    /// Advance both the monotonic and wall clocks by the given duration
    pub fn advance(&self, duration: Duration) {
        *self.current.lock() += duration;
        let mut wall = self.wall.lock();
        *wall += chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero());
    }

    /// Set the wall clock to a specific time
    pub fn set_wall(&self, time: DateTime<Utc>) {
        *self.wall.lock() = time;
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        *self.current.lock()
    }

    fn wall(&self) -> DateTime<Utc> {
        *self.wall.lock()
    }
}

#[cfg(test)]
#[path = "clock_tests.rs"]
mod tests;
