use std::path::Path;

use anyhow::{Context, Result};
use syncwork_engine::config;
use syncwork_engine::naming::{connector_pod_name, replication_pod_name};
use syncwork_types::output::ConnectorOperation;

use super::context;

/// Connector pod name when both `image` and `operation` are set, otherwise
/// the replication pod name.
pub fn render(
    image: Option<&str>,
    operation: Option<ConnectorOperation>,
    job_id: i64,
    attempt_id: i64,
) -> String {
    match (image, operation) {
        (Some(image), Some(op)) => connector_pod_name(image, op, job_id, attempt_id),
        _ => replication_pod_name(job_id, attempt_id),
    }
}

/// Whether `pod_name` left its completion marker in the configured namespace.
pub fn completed(config_path: &Path, pod_name: &str) -> Result<bool> {
    let config = config::load(config_path)
        .with_context(|| format!("Failed to load config: {}", config_path.display()))?;
    let completed = context::doc_store(&config)
        .has_pod_completed(&config.storage.namespace, pod_name)?;
    Ok(completed)
}
