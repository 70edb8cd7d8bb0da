//! File-backed store behaviour across reopen and concurrent writers.

use std::collections::BTreeMap;
use std::sync::{Arc, Barrier};
use std::thread;

use syncwork_state::{InsertOutcome, SqliteStore, StreamTrackingStore, WorkloadStore};
use syncwork_types::protocol::StreamDescriptor;
use syncwork_types::state::RefreshType;
use syncwork_types::workload::{
    MutexPolicy, NewWorkload, StatusChange, WorkloadId, WorkloadPriority, WorkloadStatus,
    WorkloadType,
};
use uuid::Uuid;

fn workload(id: &str, mutex_key: &str) -> NewWorkload {
    NewWorkload {
        id: WorkloadId::new(id),
        workload_type: WorkloadType::Sync,
        priority: WorkloadPriority::Default,
        mutex_key: Some(mutex_key.to_string()),
        labels: BTreeMap::new(),
        input_payload: r#"{"connectionId":"c"}"#.into(),
        log_path: format!("/logs/{id}.log"),
        auto_id: Uuid::new_v4(),
        dataplane_group: String::new(),
        signal_input: None,
        start_time_ms: Some(1_700_000_000_000),
        deadline: None,
    }
}

#[test]
fn state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("workloads.db");
    let conn = Uuid::new_v4();

    {
        let store = SqliteStore::open(&path).unwrap();
        store
            .insert(&workload("w1", "conn"), MutexPolicy::Reject)
            .unwrap();
        store.claim(&WorkloadId::new("w1"), "dp-1", None).unwrap();
        store
            .increment_generations(conn, &[StreamDescriptor::new("users", None)], 3)
            .unwrap();
        store
            .request_refresh(conn, &[StreamDescriptor::new("users", None)], RefreshType::Merge)
            .unwrap();
    }

    let store = SqliteStore::open(&path).unwrap();
    let w = store.get(&WorkloadId::new("w1")).unwrap().unwrap();
    assert_eq!(w.status, WorkloadStatus::Claimed);
    assert_eq!(w.start_time_ms, Some(1_700_000_000_000));
    assert_eq!(store.current_generations(conn).unwrap()[0].generation_id, 1);
    assert_eq!(store.pending_refreshes(conn).unwrap().len(), 1);
}

#[test]
fn concurrent_inserts_admit_one_mutex_holder() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteStore::open(&dir.path().join("w.db")).unwrap());

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                store
                    .insert(&workload(&format!("w{i}"), "shared"), MutexPolicy::Reject)
                    .unwrap()
            })
        })
        .collect();

    let created = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|o| matches!(o, InsertOutcome::Created { .. }))
        .count();
    assert_eq!(created, 1);
    assert_eq!(store.count_pending(None, None).unwrap(), 1);
}

#[test]
fn separate_handles_contend_without_storage_errors() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shared.db");
    SqliteStore::open(&path).unwrap();

    const HANDLES: usize = 6;
    const ROUNDS: usize = 10;
    let barrier = Arc::new(Barrier::new(HANDLES));

    let handles: Vec<_> = (0..HANDLES)
        .map(|i| {
            let path = path.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                // One connection per thread, as separate processes would have.
                let store = SqliteStore::open(&path).unwrap();
                (0..ROUNDS)
                    .map(|round| {
                        barrier.wait();
                        store.insert(
                            &workload(&format!("r{round}-w{i}"), &format!("key-{round}")),
                            MutexPolicy::Reject,
                        )
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut created = 0;
    let mut held = 0;
    for handle in handles {
        for outcome in handle.join().unwrap() {
            match outcome.unwrap() {
                InsertOutcome::Created { .. } => created += 1,
                InsertOutcome::MutexHeld(_) => held += 1,
                other => panic!("unexpected outcome {other:?}"),
            }
        }
    }
    assert_eq!(created, ROUNDS);
    assert_eq!(held, ROUNDS * (HANDLES - 1));
}

#[test]
fn concurrent_compare_and_set_has_one_winner() {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    store
        .insert(&workload("w1", "conn"), MutexPolicy::Reject)
        .unwrap();
    store.claim(&WorkloadId::new("w1"), "dp", None).unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                store
                    .compare_and_set_status(
                        &WorkloadId::new("w1"),
                        WorkloadStatus::Claimed,
                        WorkloadStatus::Running,
                        &StatusChange::default(),
                    )
                    .unwrap()
            })
        })
        .collect();

    let winners = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|won| *won)
        .count();
    assert_eq!(winners, 1);
}
