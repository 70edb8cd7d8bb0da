use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use syncwork_engine::config::types::SignalMode;
use syncwork_engine::config::{self, ServiceConfig};
use syncwork_engine::dataplane::{DataplaneResolver, StaticWorkspaceDirectory};
use syncwork_engine::docstore::{LocalObjectStore, OutputDocStore};
use syncwork_engine::metrics::TracingMetricClient;
use syncwork_engine::signal::{
    InProcessSignalSender, LoggingWorkflowSignalHandler, SignalDispatcher, SignalNotifier,
};
use syncwork_engine::WorkloadHandler;
use syncwork_state::{SqliteStore, WorkloadStore};
use syncwork_types::workload::{WorkloadId, WorkloadType};
use tokio::task::JoinHandle;

/// Everything a subcommand needs, built from the service config.
pub struct AppContext {
    pub config: ServiceConfig,
    pub handler: Arc<WorkloadHandler>,
    pub resolver: DataplaneResolver,
    signals: Arc<PendingSignals>,
}

impl AppContext {
    /// Wait for every signal queued by this command. Each delivery is
    /// bounded by the configured signal timeout.
    pub async fn flush_signals(&self) {
        self.signals.flush().await;
    }
}

/// Starts each delivery as a task under the dispatcher's timeout and keeps
/// its handle, so the command can wait for it before the process exits.
struct PendingSignals {
    dispatcher: SignalDispatcher,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl PendingSignals {
    fn new(dispatcher: SignalDispatcher) -> Self {
        Self {
            dispatcher,
            handles: Mutex::new(Vec::new()),
        }
    }

    async fn flush(&self) {
        let handles = std::mem::take(
            &mut *self.handles.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Signal delivery task failed");
            }
        }
    }
}

impl SignalNotifier for PendingSignals {
    fn notify(&self, workload_id: &WorkloadId, workload_type: WorkloadType, payload: &str) {
        let spawned = self
            .dispatcher
            .spawn(workload_id.clone(), workload_type, payload.to_string());
        if let Some(handle) = spawned {
            self.handles
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(handle);
        }
    }
}

/// Load the config at `config_path` and open the workload store.
pub fn build(config_path: &Path) -> Result<AppContext> {
    let config = config::load(config_path)
        .with_context(|| format!("Failed to load config: {}", config_path.display()))?;

    let store = SqliteStore::open(&config.database)
        .with_context(|| format!("Failed to open database: {}", config.database.display()))?;
    let store: Arc<dyn WorkloadStore> = Arc::new(store);

    if config.signal.mode == SignalMode::Remote {
        tracing::warn!("Remote signal delivery is not available from the CLI, logging signals instead");
    }
    let signals = Arc::new(PendingSignals::new(SignalDispatcher::new(
        Arc::new(InProcessSignalSender::new(Arc::new(LoggingWorkflowSignalHandler))),
        Arc::new(TracingMetricClient),
        config.signal.timeout(),
    )));

    let handler = WorkloadHandler::new(store, Arc::clone(&signals) as Arc<dyn SignalNotifier>)
        .with_mutex_policy(config.dispatch.mutex_policy);
    let resolver = DataplaneResolver::new(Arc::new(StaticWorkspaceDirectory::new(
        config.dataplane.workspaces.clone(),
    )));

    tracing::debug!(
        database = %config.database.display(),
        mutex_policy = ?config.dispatch.mutex_policy,
        "CLI context ready"
    );

    Ok(AppContext {
        config,
        handler: Arc::new(handler),
        resolver,
        signals,
    })
}

/// Output documents and pod markers under the configured storage root.
pub fn doc_store(config: &ServiceConfig) -> OutputDocStore {
    OutputDocStore::new(
        Arc::new(LocalObjectStore::new(config.storage.root.clone())),
        Arc::new(TracingMetricClient),
    )
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use syncwork_engine::metrics::{InMemoryMetricClient, WORKLOAD_SIGNAL};
    use syncwork_engine::signal::WorkflowSignalHandler;

    use super::*;

    struct SlowWorkflow(Duration);

    impl WorkflowSignalHandler for SlowWorkflow {
        fn signal(&self, _workflow_type: &str, _workflow_id: &str) -> anyhow::Result<()> {
            std::thread::sleep(self.0);
            Ok(())
        }
    }

    fn pending(delay: Duration, timeout: Duration) -> (PendingSignals, Arc<InMemoryMetricClient>) {
        let metrics = Arc::new(InMemoryMetricClient::default());
        let dispatcher = SignalDispatcher::new(
            Arc::new(InProcessSignalSender::new(Arc::new(SlowWorkflow(delay)))),
            metrics.clone(),
            timeout,
        );
        (PendingSignals::new(dispatcher), metrics)
    }

    const PAYLOAD: &str = r#"{"workflowType":"sync","workflowId":"wf-1"}"#;

    #[tokio::test(flavor = "multi_thread")]
    async fn notify_does_not_wait_for_delivery() {
        let (signals, _) = pending(Duration::from_millis(300), Duration::from_secs(5));

        let started = Instant::now();
        signals.notify(&WorkloadId::new("w1"), WorkloadType::Sync, PAYLOAD);
        assert!(started.elapsed() < Duration::from_millis(200));

        signals.flush().await;
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn flush_is_bounded_by_signal_timeout() {
        let (signals, metrics) = pending(Duration::from_secs(1), Duration::from_millis(50));

        signals.notify(&WorkloadId::new("w1"), WorkloadType::Sync, PAYLOAD);
        let started = Instant::now();
        signals.flush().await;

        assert!(started.elapsed() < Duration::from_millis(800));
        assert!(signals.handles.lock().unwrap().is_empty());
        let events = metrics.named(WORKLOAD_SIGNAL);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].tag("failure_type"), Some("timeout"));
    }
}
