//! Spec: a task interrupted mid-flight resumes after a daemon restart.

use std::sync::Arc;
use std::time::Duration;

use warden_core::{Clock, Outcome, SystemClock, TaskStatus};
use warden_engine::{handler_fn, HandlerSpec};

use crate::prelude::{overlord_in, wait_until};

#[tokio::test]
async fn doing_task_is_replayed_after_restart() {
    let dir = tempfile::tempdir().unwrap();

    // First life: the handler hangs, ignoring cancellation; shutdown times
    // out and leaves the task Doing on disk.
    let task_id = {
        let overlord = overlord_in(dir.path());
        overlord.runner().add_handler(
            "sticky",
            HandlerSpec::new(handler_fn(|_| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Outcome::Success
            })),
        );

        let task_id = {
            let state = overlord.state();
            let mut guard = state.lock();
            let change_id = guard.new_change("install", "Install \"core\"", SystemClock.wall());
            let task_id = guard.new_task(&change_id, "sticky", "Copy data").unwrap();
            guard.unlock().unwrap();
            task_id
        };

        overlord.start().await.unwrap();
        let state = overlord.state();
        {
            let state = Arc::clone(&state);
            let task_id = task_id.clone();
            wait_until(move || {
                state
                    .lock()
                    .task(&task_id)
                    .map(|t| t.status == TaskStatus::Doing)
                    .unwrap_or(false)
            })
            .await;
        }
        overlord.stop().await;

        // In-flight status was checkpointed
        assert_eq!(
            state.lock().task(&task_id).unwrap().status,
            TaskStatus::Doing
        );
        task_id
    };

    // Second life: the status is rewound and the handler runs again
    let overlord = overlord_in(dir.path());
    {
        let state = overlord.state();
        assert_eq!(state.lock().task(&task_id).unwrap().status, TaskStatus::Do);
    }

    overlord.runner().add_handler(
        "sticky",
        HandlerSpec::new(handler_fn(|_| async { Outcome::Success })),
    );
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
}
