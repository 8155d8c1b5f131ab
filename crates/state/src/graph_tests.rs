// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use indexmap::IndexMap;
use warden_core::ChangeId;

fn chain(n: usize) -> IndexMap<String, Task> {
    let mut tasks = IndexMap::new();
    for i in 1..=n {
        let mut task = Task::new(
            TaskId::from_counter(i as u64),
            ChangeId::new("1"),
            "step",
            format!("Step {i}"),
        );
        if i < n {
            task.halt_tasks.push(TaskId::from_counter(i as u64 + 1));
        }
        tasks.insert(i.to_string(), task);
    }
    tasks
}

#[test]
fn reachable_along_chain() {
    let tasks = chain(4);
    assert!(reachable(&tasks, &TaskId::new("1"), &TaskId::new("4")));
    assert!(reachable(&tasks, &TaskId::new("2"), &TaskId::new("3")));
}

#[test]
fn not_reachable_backwards() {
    let tasks = chain(4);
    assert!(!reachable(&tasks, &TaskId::new("4"), &TaskId::new("1")));
    assert!(!reachable(&tasks, &TaskId::new("3"), &TaskId::new("2")));
}

#[test]
fn self_is_reachable() {
    let tasks = chain(2);
    assert!(reachable(&tasks, &TaskId::new("1"), &TaskId::new("1")));
}

#[test]
fn diamond_reaches_through_both_arms() {
    // 1 -> {2, 3} -> 4
    let mut tasks = IndexMap::new();
    for i in 1..=4u64 {
        tasks.insert(
            i.to_string(),
            Task::new(TaskId::from_counter(i), ChangeId::new("1"), "step", "Step"),
        );
    }
    tasks["1"].halt_tasks = vec![TaskId::new("2"), TaskId::new("3")];
    tasks["2"].halt_tasks = vec![TaskId::new("4")];
    tasks["3"].halt_tasks = vec![TaskId::new("4")];

    assert!(reachable(&tasks, &TaskId::new("1"), &TaskId::new("4")));
    assert!(!reachable(&tasks, &TaskId::new("2"), &TaskId::new("3")));
}

#[test]
fn dangling_edge_does_not_loop() {
    let mut tasks = chain(2);
    tasks["2"].halt_tasks.push(TaskId::new("99"));
    assert!(!reachable(&tasks, &TaskId::new("1"), &TaskId::new("42")));
}
