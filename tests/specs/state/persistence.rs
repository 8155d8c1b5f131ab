//! Spec: the state document survives process death byte-for-byte, modulo
//! cache slots which are never persisted.

use std::sync::Arc;

use warden_core::{Clock, SystemClock, TaskStatus};
use warden_state::{load_document, FileBackend, State};

use crate::prelude::overlord_in;

#[tokio::test]
async fn document_round_trips_through_the_state_file() {
    let dir = tempfile::tempdir().unwrap();
    let state_path = dir.path().join("state.json");

    {
        let backend = Arc::new(FileBackend::new(&state_path));
        let state = State::new(backend);
        let mut guard = state.lock();
        guard.set("store-url", &"https://store.example").unwrap();
        guard.cache("not-persisted", 42u64);

        let change_id = guard.new_change("install", "Install \"core\"", SystemClock.wall());
        let a = guard.new_task(&change_id, "download", "Download").unwrap();
        let b = guard.new_task(&change_id, "mount", "Mount").unwrap();
        guard.add_halt(&a, &b).unwrap();
        guard.task_mut(&a).unwrap().status = TaskStatus::Done;
        guard.add_warning("example warning", SystemClock.wall());
        guard.unlock().unwrap();
    }

    let doc = load_document(&state_path).unwrap().unwrap();
    assert_eq!(
        doc.data_get::<String>("store-url").unwrap().as_deref(),
        Some("https://store.example")
    );
    // Cache slots never reach the document
    assert!(doc.data_get::<u64>("not-persisted").unwrap().is_none());
    assert_eq!(doc.changes.len(), 1);
    assert_eq!(doc.tasks.len(), 2);
    assert_eq!(doc.last_task_id, 2);
    assert_eq!(doc.warnings.len(), 1);

    // Serialize → deserialize is the identity on the document
    let json = serde_json::to_string(&doc).unwrap();
    let back: warden_state::StateDoc = serde_json::from_str(&json).unwrap();
    similar_asserts::assert_eq!(
        serde_json::to_value(&back).unwrap(),
        serde_json::to_value(&doc).unwrap()
    );
}

#[tokio::test]
async fn checkpoint_failure_rolls_back_the_transaction() {
    // A directory squatting on the state file path makes the atomic
    // rename fail, whatever user the tests run as
    let dir = tempfile::tempdir().unwrap();
    let state_path = dir.path().join("state.json");
    std::fs::create_dir(&state_path).unwrap();

    let backend = Arc::new(FileBackend::new(&state_path));
    let state = State::new(backend);

    {
        let mut guard = state.lock();
        guard.set("doomed", &true).unwrap();
        let err = guard.unlock().unwrap_err();
        assert!(matches!(err, warden_state::StateError::Persistence(_)));
    }

    // Rolled back: the mutation is gone
    assert_eq!(state.lock().get::<bool>("doomed").unwrap(), None);

    // Later transactions succeed once the obstruction is cleared
    std::fs::remove_dir(&state_path).unwrap();
    let mut guard = state.lock();
    guard.set("recovered", &true).unwrap();
    guard.unlock().unwrap();
    assert!(state_path.is_file());
}

#[tokio::test]
async fn overlord_checkpoints_are_readable_while_running() {
    let dir = tempfile::tempdir().unwrap();
    let overlord = overlord_in(dir.path());

    {
        let state = overlord.state();
        let mut guard = state.lock();
        guard.new_change("install", "Install", SystemClock.wall());
        guard.unlock().unwrap();
    }

    // An outside reader (e.g. the API layer of a second tool) sees a
    // complete document, never a partial write
    let doc = load_document(&dir.path().join("state.json")).unwrap().unwrap();
    assert_eq!(doc.changes.len(), 1);
    assert_eq!(doc.last_change_id, 1);
}
