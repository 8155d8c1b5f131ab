//! Shared helpers for the behavioral specs.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use warden_core::SystemClock;
use warden_engine::{Overlord, OverlordConfig};

/// Overlord over a file-backed state dir, tuned for fast tests: a long
/// interval (pulses come from ensure_before) and a short stop timeout.
pub fn overlord_in(dir: &Path) -> Arc<Overlord> {
    let config = OverlordConfig::new(dir.join("state.json"))
        .ensure_interval(Duration::from_secs(600))
        .stop_timeout(Duration::from_millis(100));
    Arc::new(Overlord::new(config, SystemClock).expect("overlord should build"))
}

/// Poll until `cond` holds, or panic after ~2 seconds.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("condition not reached in time");
}
