//! Spec: a halt edge that would close a cycle is rejected and leaves the
//! graph untouched.

use warden_core::{Clock, SystemClock};
use warden_state::StateError;

use crate::prelude::overlord_in;

#[tokio::test]
async fn cyclic_halt_edge_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let overlord = overlord_in(dir.path());

    let state = overlord.state();
    let mut guard = state.lock();
    let change_id = guard.new_change("install", "Install \"core\"", SystemClock.wall());
    let a = guard.new_task(&change_id, "step", "A").unwrap();
    let b = guard.new_task(&change_id, "step", "B").unwrap();

    guard.add_halt(&a, &b).unwrap();
    let err = guard.add_halt(&b, &a).unwrap_err();
    assert!(matches!(err, StateError::DependencyCycle { .. }));

    // Graph unchanged
    assert_eq!(guard.task(&a).unwrap().halt_tasks, vec![b.clone()]);
    assert!(guard.task(&b).unwrap().halt_tasks.is_empty());
    assert_eq!(guard.task(&b).unwrap().wait_tasks, vec![a.clone()]);
    assert!(guard.task(&a).unwrap().wait_tasks.is_empty());
}
