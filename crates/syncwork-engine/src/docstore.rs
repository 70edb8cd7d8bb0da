//! Job output documents and pod completion markers in object storage.

use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use syncwork_types::output::{ConnectorJobOutput, ReplicationOutput};
use syncwork_types::workload::WorkloadId;

use crate::metrics::{MetricClient, DOC_STORE_READ};
use crate::naming::output_location;

/// Key prefix of workload output documents.
const OUTPUT_PREFIX: &str = "workload-output";

/// Storage failure while reading or writing an output document.
#[derive(Debug, thiserror::Error)]
#[error("doc store access failed for '{key}': {source}")]
pub struct DocStoreAccessError {
    pub key: String,
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync>,
}

impl DocStoreAccessError {
    fn new(key: &str, source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self {
            key: key.to_string(),
            source: source.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Object storage
// ---------------------------------------------------------------------------

/// Minimal key/value object storage.
pub trait ObjectStore: Send + Sync {
    /// Object at `key`, or `None` if absent.
    ///
    /// # Errors
    ///
    /// Returns an I/O error on storage failure.
    fn read(&self, key: &str) -> io::Result<Option<Vec<u8>>>;

    /// # Errors
    ///
    /// Returns an I/O error on storage failure.
    fn write(&self, key: &str, data: &[u8]) -> io::Result<()>;

    /// # Errors
    ///
    /// Returns an I/O error on storage failure.
    fn exists(&self, key: &str) -> io::Result<bool>;
}

/// Object store rooted at a local directory; keys are relative paths.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> io::Result<PathBuf> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid object key '{key}'"),
            ));
        }
        Ok(self.root.join(relative))
    }
}

impl ObjectStore for LocalObjectStore {
    fn read(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
        match std::fs::read(self.path_for(key)?) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn write(&self, key: &str, data: &[u8]) -> io::Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, data)
    }

    fn exists(&self, key: &str) -> io::Result<bool> {
        self.path_for(key)?.try_exists()
    }
}

// ---------------------------------------------------------------------------
// Output documents
// ---------------------------------------------------------------------------

/// Reads and writes job outputs keyed by workload id.
pub struct OutputDocStore {
    store: Arc<dyn ObjectStore>,
    metrics: Arc<dyn MetricClient>,
}

impl OutputDocStore {
    pub fn new(store: Arc<dyn ObjectStore>, metrics: Arc<dyn MetricClient>) -> Self {
        Self { store, metrics }
    }

    /// # Errors
    ///
    /// Returns [`DocStoreAccessError`] on storage or decode failure.
    pub fn read_connector_output(
        &self,
        workload_id: &WorkloadId,
    ) -> Result<Option<ConnectorJobOutput>, DocStoreAccessError> {
        self.read_doc("connector", workload_id)
    }

    /// # Errors
    ///
    /// Returns [`DocStoreAccessError`] on storage or decode failure.
    pub fn read_sync_output(
        &self,
        workload_id: &WorkloadId,
    ) -> Result<Option<ReplicationOutput>, DocStoreAccessError> {
        self.read_doc("sync", workload_id)
    }

    /// # Errors
    ///
    /// Returns [`DocStoreAccessError`] on storage failure.
    pub fn write_connector_output(
        &self,
        workload_id: &WorkloadId,
        output: &ConnectorJobOutput,
    ) -> Result<(), DocStoreAccessError> {
        self.write_doc(workload_id, output)
    }

    /// # Errors
    ///
    /// Returns [`DocStoreAccessError`] on storage failure.
    pub fn write_sync_output(
        &self,
        workload_id: &WorkloadId,
        output: &ReplicationOutput,
    ) -> Result<(), DocStoreAccessError> {
        self.write_doc(workload_id, output)
    }

    /// Whether `pod_name` left its completion marker. A missing marker means
    /// no output yet.
    ///
    /// # Errors
    ///
    /// Returns [`DocStoreAccessError`] on storage failure.
    pub fn has_pod_completed(
        &self,
        namespace: &str,
        pod_name: &str,
    ) -> Result<bool, DocStoreAccessError> {
        let key = output_location(namespace, pod_name);
        self.store
            .exists(&key)
            .map_err(|e| DocStoreAccessError::new(&key, e))
    }

    /// Write the completion marker for `pod_name`.
    ///
    /// # Errors
    ///
    /// Returns [`DocStoreAccessError`] on storage failure.
    pub fn mark_pod_completed(
        &self,
        namespace: &str,
        pod_name: &str,
    ) -> Result<(), DocStoreAccessError> {
        let key = output_location(namespace, pod_name);
        self.store
            .write(&key, b"")
            .map_err(|e| DocStoreAccessError::new(&key, e))
    }

    fn read_doc<T: DeserializeOwned>(
        &self,
        document: &str,
        workload_id: &WorkloadId,
    ) -> Result<Option<T>, DocStoreAccessError> {
        let key = output_key(workload_id);
        let result = self
            .store
            .read(&key)
            .map_err(|e| DocStoreAccessError::new(&key, e))
            .and_then(|bytes| {
                bytes
                    .map(|b| serde_json::from_slice(&b))
                    .transpose()
                    .map_err(|e| DocStoreAccessError::new(&key, e))
            });

        let status = if result.is_ok() { "success" } else { "error" };
        self.metrics
            .count(DOC_STORE_READ, 1, &[("status", status), ("document", document)]);
        if let Err(e) = &result {
            tracing::error!(workload_id = %workload_id, error = %e, "Failed to read job output");
        }
        result
    }

    fn write_doc<T: Serialize>(
        &self,
        workload_id: &WorkloadId,
        doc: &T,
    ) -> Result<(), DocStoreAccessError> {
        let key = output_key(workload_id);
        let bytes = serde_json::to_vec(doc).map_err(|e| DocStoreAccessError::new(&key, e))?;
        self.store
            .write(&key, &bytes)
            .map_err(|e| DocStoreAccessError::new(&key, e))?;
        tracing::debug!(workload_id = %workload_id, bytes = bytes.len(), "Wrote job output");
        Ok(())
    }
}

fn output_key(workload_id: &WorkloadId) -> String {
    format!("{OUTPUT_PREFIX}/{workload_id}")
}
