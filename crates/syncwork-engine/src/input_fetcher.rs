//! Worker-side input fetch.
//!
//! Runs once when an execution unit starts: fetch the raw payload, hydrate
//! it, and hand it to the job. Any failure is reported against the workload
//! before the process exits non-zero, so a worker that dies before starting
//! still marks its workload failed.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use syncwork_types::workload::WorkloadId;

use crate::backoff::with_deadline;
use crate::errors::EngineError;
use crate::hydrate::{ConfigHydrator, HydrationScope};
use crate::lifecycle::WorkloadHandler;

/// Termination source recorded for failures reported by the fetcher.
pub const FETCHER_SOURCE: &str = "workload-init";

/// Workload API used by execution units.
pub trait WorkloadApiClient: Send + Sync {
    /// Raw input payload of `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload can't be retrieved.
    fn fetch_input(&self, id: &WorkloadId) -> anyhow::Result<String>;

    /// Mark `id` failed.
    ///
    /// # Errors
    ///
    /// Returns an error if the failure could not be recorded.
    fn report_failure(&self, id: &WorkloadId, source: &str, reason: &str) -> anyhow::Result<()>;
}

impl WorkloadApiClient for WorkloadHandler {
    fn fetch_input(&self, id: &WorkloadId) -> anyhow::Result<String> {
        Ok(self.get(id)?.input_payload)
    }

    fn report_failure(&self, id: &WorkloadId, source: &str, reason: &str) -> anyhow::Result<()> {
        self.fail(id, Some(source), Some(reason))?;
        Ok(())
    }
}

/// Fetches and hydrates a workload's input.
pub struct InputFetcher {
    api: Arc<dyn WorkloadApiClient>,
    hydrator: Arc<dyn ConfigHydrator>,
}

impl InputFetcher {
    pub fn new(api: Arc<dyn WorkloadApiClient>, hydrator: Arc<dyn ConfigHydrator>) -> Self {
        Self { api, hydrator }
    }

    /// Fetch and hydrate the input of `id`.
    ///
    /// # Errors
    ///
    /// - [`EngineError::InputFetch`] if the payload can't be retrieved or is
    ///   not JSON.
    /// - [`EngineError::Hydration`] if hydration fails.
    ///
    /// The workload is reported failed before either is returned.
    pub fn fetch(&self, id: &WorkloadId) -> Result<Value, EngineError> {
        let raw = match self.api.fetch_input(id) {
            Ok(raw) => raw,
            Err(e) => {
                let reason = format!("Failed to retrieve workload input: {e:#}");
                self.report(id, &reason);
                return Err(EngineError::InputFetch {
                    id: id.clone(),
                    reason,
                });
            }
        };

        let payload: Value = match serde_json::from_str(&raw) {
            Ok(v) => v,
            Err(e) => {
                let reason = format!("Workload input is not valid JSON: {e}");
                self.report(id, &reason);
                return Err(EngineError::InputFetch {
                    id: id.clone(),
                    reason,
                });
            }
        };

        let scope = HydrationScope::from_payload(&payload);
        match self.hydrator.hydrate(payload, &scope) {
            Ok(hydrated) => {
                tracing::info!(workload_id = %id, "Workload input ready");
                Ok(hydrated)
            }
            Err(e) => {
                let reason = format!("Failed to hydrate workload input: {e:#}");
                self.report(id, &reason);
                Err(EngineError::Hydration {
                    id: id.clone(),
                    reason,
                })
            }
        }
    }

    /// [`InputFetcher::fetch`] bounded by `limit`.
    ///
    /// The fetch runs on its own thread; on timeout the workload is reported
    /// failed and the thread is left behind, so it never holds the process
    /// open.
    ///
    /// # Errors
    ///
    /// Everything [`InputFetcher::fetch`] returns, plus
    /// [`EngineError::InputFetch`] when `limit` elapses.
    pub async fn fetch_within(
        self: Arc<Self>,
        id: &WorkloadId,
        limit: Duration,
    ) -> Result<Value, EngineError> {
        let (tx, rx) = oneshot::channel();
        let fetcher = Arc::clone(&self);
        let worker_id = id.clone();
        std::thread::spawn(move || {
            let _ = tx.send(fetcher.fetch(&worker_id));
        });

        let reason = match with_deadline(limit, "workload input fetch", rx).await {
            Ok(Ok(result)) => return result,
            Ok(Err(_)) => "Workload input fetch stopped without a result".to_string(),
            Err(e) => format!("Failed to retrieve workload input: {e}"),
        };
        self.report(id, &reason);
        Err(EngineError::InputFetch {
            id: id.clone(),
            reason,
        })
    }

    /// Best-effort failure report.
    fn report(&self, id: &WorkloadId, reason: &str) {
        tracing::error!(workload_id = %id, reason, "Workload init failed");
        if let Err(e) = self.api.report_failure(id, FETCHER_SOURCE, reason) {
            tracing::error!(workload_id = %id, error = %e, "Failed to report workload failure");
        }
    }
}
