//! Spec: a failing task aborts its lane; completed work is reverted and
//! unstarted work is held.

use std::sync::{Arc, Mutex};

use warden_core::{ChangeStatus, Clock, Outcome, SystemClock, TaskStatus};
use warden_engine::{handler_fn, HandlerSpec, TaskContext};

use crate::prelude::{overlord_in, wait_until};

#[tokio::test]
async fn failure_reverts_completed_work_and_holds_the_rest() {
    let dir = tempfile::tempdir().unwrap();
    let overlord = overlord_in(dir.path());

    let undone: Arc<Mutex<Vec<String>>> = Arc::default();
    {
        let undone = Arc::clone(&undone);
        overlord.runner().add_handler(
            "ok",
            HandlerSpec::new(handler_fn(|_| async { Outcome::Success })).undo_handler(
                handler_fn(move |ctx: TaskContext| {
                    let undone = Arc::clone(&undone);
                    async move {
                        undone.lock().unwrap().push(ctx.task_id().to_string());
                        Outcome::Success
                    }
                }),
            ),
        );
    }
    overlord.runner().add_handler(
        "broken",
        HandlerSpec::new(handler_fn(|_| async { Outcome::err("boom") })),
    );

    let (change_id, [a, b, c]) = {
        let state = overlord.state();
        let mut guard = state.lock();
        let change_id = guard.new_change("install", "Install \"core\"", SystemClock.wall());
        let a = guard.new_task(&change_id, "ok", "Download").unwrap();
        let b = guard.new_task(&change_id, "broken", "Mount").unwrap();
        let c = guard.new_task(&change_id, "ok", "Link").unwrap();
        guard.add_halt(&a, &b).unwrap();
        guard.add_halt(&b, &c).unwrap();
        guard.unlock().unwrap();
        (change_id, [a, b, c])
    };

    overlord.start().await.unwrap();

    let state = overlord.state();
    {
        let state = Arc::clone(&state);
        let a = a.clone();
        wait_until(move || {
            state
                .lock()
                .task(&a)
                .map(|t| t.status == TaskStatus::Undone)
                .unwrap_or(false)
        })
        .await;
    }
    overlord.stop().await;

    let guard = state.lock();
    assert_eq!(guard.task(&a).unwrap().status, TaskStatus::Undone);
    assert_eq!(guard.task(&b).unwrap().status, TaskStatus::Error);
    assert_eq!(guard.task(&c).unwrap().status, TaskStatus::Hold);
    assert_eq!(guard.change_status(&change_id).unwrap(), ChangeStatus::Error);

    let summary = guard.err_summary(&change_id).unwrap();
    assert!(summary.contains("boom"), "summary was: {summary}");

    // Only the completed task was reverted
    assert_eq!(undone.lock().unwrap().as_slice(), &[a.to_string()]);
}
