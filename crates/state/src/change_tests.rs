// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use chrono::TimeZone;

fn t0() -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).single().unwrap()
}

fn test_change() -> Change {
    Change::new(ChangeId::new("1"), "install", "Install package \"core\"", t0())
}

#[test]
fn new_change_fields() {
    let change = test_change();
    assert_eq!(change.kind, "install");
    assert_eq!(change.spawn_time, t0());
    assert!(change.ready_time.is_none());
    assert!(change.task_ids.is_empty());
}

#[test]
fn new_lane_counts_up_from_one() {
    let mut change = test_change();
    assert_eq!(change.new_lane(), 1);
    assert_eq!(change.new_lane(), 2);
    assert_eq!(change.lane_counter, 2);
}

#[test]
fn mark_lanes_aborted_dedupes() {
    let mut change = test_change();
    change.mark_lanes_aborted(&[1, 2]);
    change.mark_lanes_aborted(&[2, 3]);
    assert_eq!(change.aborted_lanes, vec![1, 2, 3]);
    assert!(change.is_lane_aborted(2));
    assert!(!change.is_lane_aborted(4));
}

#[test]
fn data_slots_round_trip() {
    let mut change = test_change();
    change.data_set("package", &"core").unwrap();
    assert_eq!(change.data_get::<String>("package").unwrap().as_deref(), Some("core"));
}

#[test]
fn serde_uses_kebab_case_fields() {
    let mut change = test_change();
    change.ready_time = Some(t0());
    change.task_ids.push(warden_core::TaskId::new("1"));

    let json = serde_json::to_value(&change).unwrap();
    assert!(json.get("spawn-time").is_some());
    assert!(json.get("ready-time").is_some());
    assert!(json.get("task-ids").is_some());
    assert!(json.get("lane-counter").is_some());
}
