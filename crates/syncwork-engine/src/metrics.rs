//! Counter emission seam.
//!
//! Metric emission is fire-and-forget: implementations never return errors.

use std::sync::{Mutex, PoisonError};

pub const WORKLOAD_SIGNAL: &str = "workload_signal";
pub const DOC_STORE_READ: &str = "doc_store_read";

/// Sink for counter metrics.
pub trait MetricClient: Send + Sync {
    fn count(&self, name: &str, value: u64, tags: &[(&str, &str)]);
}

/// Emits metrics as `tracing` events on target `syncwork::metrics`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetricClient;

impl MetricClient for TracingMetricClient {
    fn count(&self, name: &str, value: u64, tags: &[(&str, &str)]) {
        tracing::debug!(target: "syncwork::metrics", metric = name, value, tags = ?tags, "count");
    }
}

/// One recorded counter increment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricEvent {
    pub name: String,
    pub value: u64,
    pub tags: Vec<(String, String)>,
}

impl MetricEvent {
    /// Value of tag `key`, if present.
    #[must_use]
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct InMemoryMetricClient {
    events: Mutex<Vec<MetricEvent>>,
}

impl InMemoryMetricClient {
    #[must_use]
    pub fn events(&self) -> Vec<MetricEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Events named `name`.
    #[must_use]
    pub fn named(&self, name: &str) -> Vec<MetricEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.name == name)
            .collect()
    }
}

impl MetricClient for InMemoryMetricClient {
    fn count(&self, name: &str, value: u64, tags: &[(&str, &str)]) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(MetricEvent {
                name: name.to_string(),
                value,
                tags: tags
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                    .collect(),
            });
    }
}
