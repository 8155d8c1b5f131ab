//! Spec: a retrying task backs off via the ensure loop and eventually
//! completes.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use warden_core::{Clock, Outcome, SystemClock, TaskStatus};
use warden_engine::{handler_fn, HandlerSpec};

use crate::prelude::{overlord_in, wait_until};

#[tokio::test]
async fn retry_re_enters_until_success() {
    let dir = tempfile::tempdir().unwrap();
    let overlord = overlord_in(dir.path());

    let attempts = Arc::new(AtomicU32::new(0));
    {
        let attempts = Arc::clone(&attempts);
        overlord.runner().add_handler(
            "flaky",
            HandlerSpec::new(handler_fn(move |_| {
                let attempts = Arc::clone(&attempts);
                async move {
                    if attempts.fetch_add(1, Ordering::SeqCst) < 3 {
                        Outcome::Retry(Duration::from_millis(10))
                    } else {
                        Outcome::Success
                    }
                }
            })),
        );
    }

    let task_id = {
        let state = overlord.state();
        let mut guard = state.lock();
        let change_id = guard.new_change("refresh", "Refresh \"core\"", SystemClock.wall());
        let task_id = guard.new_task(&change_id, "flaky", "Sync store").unwrap();
        guard.unlock().unwrap();
        task_id
    };

    // The ensure interval is 10 minutes, so every re-entry within the test
    // window is driven by the retry's own ensure_before request.
    overlord.start().await.unwrap();

    let state = overlord.state();
    {
        let state = Arc::clone(&state);
        let task_id = task_id.clone();
        wait_until(move || {
            state
                .lock()
                .task(&task_id)
                .map(|t| t.status == TaskStatus::Done)
                .unwrap_or(false)
        })
        .await;
    }
    overlord.stop().await;

    assert_eq!(attempts.load(Ordering::SeqCst), 4);
    let guard = state.lock();
    assert_eq!(guard.task(&task_id).unwrap().retry_count, 3);
}
