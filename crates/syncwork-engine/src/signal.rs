//! Fire-and-forget workflow signals on terminal workload transitions.
//!
//! A workload's `signal_input` names the workflow to notify. Delivery runs
//! detached from the transition that triggered it, under its own timeout.
//! Every failure is logged to the dead-letter target and swallowed.

use std::sync::Arc;
use std::time::Duration;

use syncwork_types::signal::SignalInput;
use syncwork_types::workload::{WorkloadId, WorkloadType};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::metrics::{MetricClient, WORKLOAD_SIGNAL};

/// Target of the dead-letter log for undeliverable signals.
pub const DEAD_LETTER_TARGET: &str = "syncwork::signal_dead_letter";

// ---------------------------------------------------------------------------
// Delivery strategies
// ---------------------------------------------------------------------------

/// Delivers a decoded signal to its workflow.
pub trait SignalSender: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the workflow could not be signalled.
    fn send(&self, input: &SignalInput) -> anyhow::Result<()>;
}

/// Workflow engine entry point reachable from the same process.
pub trait WorkflowSignalHandler: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the workflow rejected or missed the signal.
    fn signal(&self, workflow_type: &str, workflow_id: &str) -> anyhow::Result<()>;
}

/// Signal endpoint of a remote dispatch service.
pub trait SignalApi: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the remote call failed.
    fn post_signal(&self, input: &SignalInput) -> anyhow::Result<()>;
}

/// Calls the workflow handler directly.
pub struct InProcessSignalSender {
    handler: Arc<dyn WorkflowSignalHandler>,
}

impl InProcessSignalSender {
    pub fn new(handler: Arc<dyn WorkflowSignalHandler>) -> Self {
        Self { handler }
    }
}

impl SignalSender for InProcessSignalSender {
    fn send(&self, input: &SignalInput) -> anyhow::Result<()> {
        self.handler.signal(&input.workflow_type, &input.workflow_id)
    }
}

/// Forwards the signal across the dispatch service's API.
pub struct RemoteSignalSender {
    api: Arc<dyn SignalApi>,
}

impl RemoteSignalSender {
    pub fn new(api: Arc<dyn SignalApi>) -> Self {
        Self { api }
    }
}

impl SignalSender for RemoteSignalSender {
    fn send(&self, input: &SignalInput) -> anyhow::Result<()> {
        self.api.post_signal(input)
    }
}

/// Workflow handler that only logs. Used when no workflow engine is wired in.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingWorkflowSignalHandler;

impl WorkflowSignalHandler for LoggingWorkflowSignalHandler {
    fn signal(&self, workflow_type: &str, workflow_id: &str) -> anyhow::Result<()> {
        tracing::info!(workflow_type, workflow_id, "Workflow signalled");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Seam the lifecycle handler calls after an applied terminal transition.
pub trait SignalNotifier: Send + Sync {
    /// Queue a signal. Must not block on delivery.
    fn notify(&self, workload_id: &WorkloadId, workload_type: WorkloadType, payload: &str);
}

/// Decodes signal payloads, delivers them through a [`SignalSender`], and
/// records the `workload_signal` metric.
#[derive(Clone)]
pub struct SignalDispatcher {
    sender: Arc<dyn SignalSender>,
    metrics: Arc<dyn MetricClient>,
    timeout: Duration,
}

impl SignalDispatcher {
    pub fn new(
        sender: Arc<dyn SignalSender>,
        metrics: Arc<dyn MetricClient>,
        timeout: Duration,
    ) -> Self {
        Self {
            sender,
            metrics,
            timeout,
        }
    }

    /// Deliver synchronously. Returns `true` when the workflow was signalled.
    pub fn deliver(&self, workload_id: &WorkloadId, workload_type: WorkloadType, payload: &str) -> bool {
        let input: SignalInput = match serde_json::from_str(payload) {
            Ok(input) => input,
            Err(e) => {
                self.metrics.count(
                    WORKLOAD_SIGNAL,
                    1,
                    &[
                        ("status", "failure"),
                        ("workload_type", workload_type.as_str()),
                        ("failure_type", "deserialization"),
                    ],
                );
                dead_letter(workload_id, payload, &format!("invalid signal input: {e}"));
                return false;
            }
        };

        match self.sender.send(&input) {
            Ok(()) => {
                self.metrics.count(
                    WORKLOAD_SIGNAL,
                    1,
                    &[
                        ("status", "success"),
                        ("workflow_type", input.workflow_type.as_str()),
                        ("workload_type", workload_type.as_str()),
                    ],
                );
                tracing::debug!(
                    workload_id = %workload_id,
                    workflow_id = input.workflow_id,
                    "Signal delivered"
                );
                true
            }
            Err(e) => {
                self.metrics.count(
                    WORKLOAD_SIGNAL,
                    1,
                    &[
                        ("status", "failure"),
                        ("workflow_type", input.workflow_type.as_str()),
                        ("workload_type", workload_type.as_str()),
                        ("failure_type", "delivery"),
                    ],
                );
                dead_letter(workload_id, payload, &format!("{e:#}"));
                false
            }
        }
    }

    /// Deliver in the background.
    ///
    /// On a tokio runtime the delivery runs as a detached task bounded by the
    /// dispatcher's timeout and its handle is returned. Outside a runtime it
    /// runs on a plain thread.
    pub fn spawn(
        &self,
        workload_id: WorkloadId,
        workload_type: WorkloadType,
        payload: String,
    ) -> Option<JoinHandle<()>> {
        let this = self.clone();
        if let Ok(handle) = Handle::try_current() {
            Some(handle.spawn(this.deliver_with_timeout(workload_id, workload_type, payload)))
        } else {
            std::thread::spawn(move || {
                this.deliver(&workload_id, workload_type, &payload);
            });
            None
        }
    }

    async fn deliver_with_timeout(
        self,
        workload_id: WorkloadId,
        workload_type: WorkloadType,
        payload: String,
    ) {
        let task = tokio::task::spawn_blocking({
            let this = self.clone();
            let workload_id = workload_id.clone();
            let payload = payload.clone();
            move || this.deliver(&workload_id, workload_type, &payload)
        });

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(_)) => {}
            Ok(Err(join_err)) => {
                dead_letter(&workload_id, &payload, &format!("signal task failed: {join_err}"));
            }
            Err(_) => {
                self.metrics.count(
                    WORKLOAD_SIGNAL,
                    1,
                    &[
                        ("status", "failure"),
                        ("workload_type", workload_type.as_str()),
                        ("failure_type", "timeout"),
                    ],
                );
                dead_letter(
                    &workload_id,
                    &payload,
                    &format!("signal timed out after {}ms", self.timeout.as_millis()),
                );
            }
        }
    }
}

impl SignalNotifier for SignalDispatcher {
    fn notify(&self, workload_id: &WorkloadId, workload_type: WorkloadType, payload: &str) {
        let _ = self.spawn(workload_id.clone(), workload_type, payload.to_string());
    }
}

fn dead_letter(workload_id: &WorkloadId, payload: &str, error: &str) {
    tracing::error!(
        target: DEAD_LETTER_TARGET,
        workload_id = %workload_id,
        payload,
        error,
        "Failed to deliver workload signal"
    );
}
