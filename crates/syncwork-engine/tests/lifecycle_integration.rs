//! End-to-end workload flow against a file-backed store.

use std::collections::BTreeMap;
use std::sync::{Arc, Barrier, Mutex};
use std::time::Duration;

use syncwork_engine::dataplane::{DataplaneResolver, StaticWorkspaceDirectory};
use syncwork_engine::hydrate::EnvVarHydrator;
use syncwork_engine::input_fetcher::{InputFetcher, WorkloadApiClient, FETCHER_SOURCE};
use syncwork_engine::metrics::{InMemoryMetricClient, MetricClient, WORKLOAD_SIGNAL};
use syncwork_engine::signal::{InProcessSignalSender, SignalDispatcher, WorkflowSignalHandler};
use syncwork_engine::{DispatchClient, EngineError, LauncherInputMessage, WorkloadHandler};
use syncwork_state::backend::SUPERSEDED_SOURCE;
use syncwork_state::{SqliteStore, WorkloadStore};
use syncwork_types::workload::{
    MutexPolicy, WorkloadId, WorkloadPriority, WorkloadStatus, WorkloadType,
};
use uuid::Uuid;

#[derive(Default)]
struct RecordingWorkflows {
    signals: Mutex<Vec<(String, String)>>,
}

impl RecordingWorkflows {
    fn signals(&self) -> Vec<(String, String)> {
        self.signals.lock().unwrap().clone()
    }
}

impl WorkflowSignalHandler for RecordingWorkflows {
    fn signal(&self, workflow_type: &str, workflow_id: &str) -> anyhow::Result<()> {
        self.signals
            .lock()
            .unwrap()
            .push((workflow_type.to_string(), workflow_id.to_string()));
        Ok(())
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    handler: Arc<WorkloadHandler>,
    dispatch: DispatchClient,
    workflows: Arc<RecordingWorkflows>,
    metrics: Arc<InMemoryMetricClient>,
    workspace: Uuid,
}

fn harness(policy: MutexPolicy) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn WorkloadStore> =
        Arc::new(SqliteStore::open(&dir.path().join("state/workloads.db")).unwrap());

    let workflows = Arc::new(RecordingWorkflows::default());
    let workflows_dyn: Arc<dyn WorkflowSignalHandler> = workflows.clone();
    let metrics = Arc::new(InMemoryMetricClient::default());
    let metrics_dyn: Arc<dyn MetricClient> = metrics.clone();
    let signals = SignalDispatcher::new(
        Arc::new(InProcessSignalSender::new(workflows_dyn)),
        metrics_dyn,
        Duration::from_secs(5),
    );

    let handler =
        Arc::new(WorkloadHandler::new(store, Arc::new(signals)).with_mutex_policy(policy));
    let workspace = Uuid::new_v4();
    let resolver = DataplaneResolver::new(Arc::new(StaticWorkspaceDirectory::new(
        BTreeMap::from([(workspace, "eu-west".to_string())]),
    )));

    Harness {
        _dir: dir,
        dispatch: DispatchClient::new(Arc::clone(&handler), resolver),
        handler,
        workflows,
        metrics,
        workspace,
    }
}

fn sync_message(id: &str, workspace: Uuid, connection: &str) -> LauncherInputMessage {
    LauncherInputMessage::builder()
        .workload_id(id)
        .workload_input(r#"{"workspaceId":"ws","config":{"host":"${SYNCWORK_TEST_HOST}"}}"#)
        .labels(BTreeMap::from([("connection_id".to_string(), connection.to_string())]))
        .log_path(format!("/logs/{id}"))
        .workload_type(WorkloadType::Sync)
        .auto_id(Uuid::new_v4())
        .priority(WorkloadPriority::High)
        .mutex_key(Some(connection.to_string()))
        .signal_input(Some(format!(
            r#"{{"workflowType":"connection_manager","workflowId":"cm-{connection}"}}"#
        )))
        .workspace_id(Some(workspace))
        .connection_id(Some(Uuid::new_v4()))
        .build()
        .unwrap()
}

/// Wait until `expected` signal metrics were recorded, then return the
/// delivered signals.
async fn wait_for_signals(h: &Harness, expected: usize) -> Vec<(String, String)> {
    for _ in 0..200 {
        if h.metrics.named(WORKLOAD_SIGNAL).len() >= expected {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    h.workflows.signals()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dispatch_claim_run_succeed_signals_workflow() {
    let h = harness(MutexPolicy::Reject);
    let id = h
        .dispatch
        .dispatch(sync_message("sync-1", h.workspace, "conn-a"))
        .unwrap();

    let queued = h
        .handler
        .poll_pending(Some("eu-west"), Some(WorkloadPriority::High), 10)
        .unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].id, id);

    assert!(h.handler.claim(&id, "dp-1", None).unwrap().is_applied());
    assert!(h.handler.launched(&id, None).unwrap().is_applied());
    assert!(h.handler.running(&id, None).unwrap().is_applied());
    let beat = h.handler.heartbeat(&id, None).unwrap();
    assert!(beat.workload().last_heartbeat_at.is_some());
    assert!(h.handler.succeed(&id).unwrap().is_applied());

    let signals = wait_for_signals(&h, 1).await;
    assert_eq!(
        signals,
        vec![("connection_manager".to_string(), "cm-conn-a".to_string())]
    );
    let metric = &h.metrics.named(WORKLOAD_SIGNAL)[0];
    assert_eq!(metric.tag("status"), Some("success"));
    assert_eq!(metric.tag("workload_type"), Some("sync"));

    // A repeated terminal update is a no-op and signals nothing new.
    assert!(!h.handler.succeed(&id).unwrap().is_applied());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.workflows.signals().len(), 1);
    assert_eq!(h.handler.count_pending(None, None).unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_supersede_fails_mutex_holder_and_signals_it() {
    let h = harness(MutexPolicy::Supersede);
    let first = h
        .dispatch
        .dispatch(sync_message("sync-1", h.workspace, "conn-a"))
        .unwrap();
    h.handler.claim(&first, "dp-1", None).unwrap();

    let second = h
        .dispatch
        .dispatch(sync_message("sync-2", h.workspace, "conn-a"))
        .unwrap();

    let old = h.handler.get(&first).unwrap();
    assert_eq!(old.status, WorkloadStatus::Failure);
    assert_eq!(old.termination_source.as_deref(), Some(SUPERSEDED_SOURCE));
    assert_eq!(h.handler.get(&second).unwrap().status, WorkloadStatus::Pending);

    let signals = wait_for_signals(&h, 1).await;
    assert_eq!(signals.len(), 1);
    assert_eq!(signals[0].1, "cm-conn-a");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_racing_success_reports_apply_and_signals_once() {
    const RACERS: usize = 8;

    let h = harness(MutexPolicy::Reject);
    let id = h
        .dispatch
        .dispatch(sync_message("sync-1", h.workspace, "conn-a"))
        .unwrap();
    h.handler.claim(&id, "dp-1", None).unwrap();
    h.handler.running(&id, None).unwrap();

    let barrier = Barrier::new(RACERS);
    let applied = std::thread::scope(|scope| {
        let racers: Vec<_> = (0..RACERS)
            .map(|i| {
                let (handler, id, barrier) = (&h.handler, &id, &barrier);
                scope.spawn(move || {
                    barrier.wait();
                    if i % 2 == 0 {
                        handler.succeed(id)
                    } else {
                        handler.set_status(id, WorkloadStatus::Success)
                    }
                })
            })
            .collect();
        racers
            .into_iter()
            .map(|r| r.join().unwrap().unwrap())
            .filter(|outcome| outcome.is_applied())
            .count()
    });
    assert_eq!(applied, 1);
    assert_eq!(h.handler.get(&id).unwrap().status, WorkloadStatus::Success);

    wait_for_signals(&h, 1).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.workflows.signals().len(), 1);
    assert_eq!(h.metrics.named(WORKLOAD_SIGNAL).len(), 1);
}

#[test]
fn test_reject_policy_keeps_holder() {
    let h = harness(MutexPolicy::Reject);
    h.dispatch
        .dispatch(sync_message("sync-1", h.workspace, "conn-a"))
        .unwrap();
    let err = h
        .dispatch
        .dispatch(sync_message("sync-2", h.workspace, "conn-a"))
        .unwrap_err();
    assert!(matches!(err, EngineError::Workload(_)));
    assert!(err.is_retryable());

    // A different connection is unaffected.
    h.dispatch
        .dispatch(sync_message("sync-3", h.workspace, "conn-b"))
        .unwrap();
    assert_eq!(h.handler.count_pending(Some("eu-west"), None).unwrap(), 2);
}

#[test]
fn test_worker_init_failure_marks_workload_failed() {
    let h = harness(MutexPolicy::Reject);
    let id = h
        .dispatch
        .dispatch(sync_message("sync-1", h.workspace, "conn-a"))
        .unwrap();
    h.handler.claim(&id, "dp-1", None).unwrap();

    let api: Arc<dyn WorkloadApiClient> = h.handler.clone();
    let fetcher = InputFetcher::new(api, Arc::new(EnvVarHydrator::with_lookup(|_| None)));
    let err = fetcher.fetch(&id).unwrap_err();
    assert!(matches!(err, EngineError::Hydration { .. }));

    let failed = h.handler.get(&id).unwrap();
    assert_eq!(failed.status, WorkloadStatus::Failure);
    assert_eq!(failed.termination_source.as_deref(), Some(FETCHER_SOURCE));
    assert!(failed
        .termination_reason
        .as_deref()
        .unwrap_or_default()
        .contains("SYNCWORK_TEST_HOST"));
}

#[test]
fn test_worker_init_hydrates_input() {
    let h = harness(MutexPolicy::Reject);
    let id = h
        .dispatch
        .dispatch(sync_message("sync-1", h.workspace, "conn-a"))
        .unwrap();

    let api: Arc<dyn WorkloadApiClient> = h.handler.clone();
    let fetcher = InputFetcher::new(
        api,
        Arc::new(EnvVarHydrator::with_lookup(|name| {
            (name == "SYNCWORK_TEST_HOST").then(|| "db.internal".to_string())
        })),
    );
    let input = fetcher.fetch(&id).unwrap();
    assert_eq!(input["config"]["host"], "db.internal");
    assert_eq!(h.handler.get(&id).unwrap().status, WorkloadStatus::Pending);
}

#[test]
fn test_unknown_workload_is_not_found() {
    let h = harness(MutexPolicy::Reject);
    let err = h
        .handler
        .claim(&WorkloadId::new("missing"), "dp-1", None)
        .unwrap_err();
    assert_eq!(
        err.kind(),
        syncwork_types::errors::ErrorKind::NotFound
    );
}
