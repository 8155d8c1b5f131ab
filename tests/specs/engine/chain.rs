//! Spec: a linear chain of successful tasks completes in halt order and
//! settles the change.

use std::sync::{Arc, Mutex};

use warden_core::{ChangeStatus, Clock, Outcome, SystemClock, TaskStatus};
use warden_engine::{handler_fn, HandlerSpec, TaskContext};

use crate::prelude::{overlord_in, wait_until};

#[tokio::test]
async fn linear_chain_completes_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let overlord = overlord_in(dir.path());

    let order: Arc<Mutex<Vec<String>>> = Arc::default();
    {
        let order = Arc::clone(&order);
        overlord.runner().add_handler(
            "step",
            HandlerSpec::new(handler_fn(move |ctx: TaskContext| {
                let order = Arc::clone(&order);
                async move {
                    ctx.set_progress("working", 1, 1);
                    order.lock().unwrap().push(ctx.task_id().to_string());
                    Outcome::Success
                }
            })),
        );
    }

    let (change_id, task_ids) = {
        let state = overlord.state();
        let mut guard = state.lock();
        let change_id = guard.new_change("install", "Install \"core\"", SystemClock.wall());
        let a = guard.new_task(&change_id, "step", "Download").unwrap();
        let b = guard.new_task(&change_id, "step", "Mount").unwrap();
        let c = guard.new_task(&change_id, "step", "Link").unwrap();
        guard.add_halt(&a, &b).unwrap();
        guard.add_halt(&b, &c).unwrap();
        guard.unlock().unwrap();
        (change_id, [a, b, c])
    };

    overlord.start().await.unwrap();

    let state = overlord.state();
    {
        let change_id = change_id.clone();
        let state = Arc::clone(&state);
        wait_until(move || {
            state
                .lock()
                .change_status(&change_id)
                .map(|s| s.is_terminal())
                .unwrap_or(false)
        })
        .await;
    }
    overlord.stop().await;

    let guard = state.lock();
    for task_id in &task_ids {
        assert_eq!(guard.task(task_id).unwrap().status, TaskStatus::Done);
        let progress = guard.task(task_id).unwrap().progress.clone().unwrap();
        assert_eq!((progress.done, progress.total), (1, 1));
    }
    assert_eq!(guard.change_status(&change_id).unwrap(), ChangeStatus::Done);
    assert!(guard.change(&change_id).unwrap().ready_time.is_some());

    // Halt order was respected
    let observed = order.lock().unwrap().clone();
    assert_eq!(
        observed,
        task_ids.iter().map(|t| t.to_string()).collect::<Vec<_>>()
    );
}
