// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Object-safe clock view.
//!
//! [`warden_core::Clock`] is `Clone` and therefore not object safe; the
//! runner and task contexts share one clock behind an `Arc<dyn SharedClock>`
//! so handlers stay free of generics.

use chrono::{DateTime, Utc};
use std::time::Instant;
use warden_core::Clock;

pub(crate) trait SharedClock: Send + Sync {
    fn now(&self) -> Instant;
    fn wall(&self) -> DateTime<Utc>;
}

impl<C: Clock> SharedClock for C {
    fn now(&self) -> Instant {
        Clock::now(self)
    }

    fn wall(&self) -> DateTime<Utc> {
        Clock::wall(self)
    }
}
