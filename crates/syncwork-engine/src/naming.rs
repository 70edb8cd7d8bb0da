//! Pod naming and output locations.
//!
//! Pod names are DNS labels: at most [`MAX_POD_NAME_LEN`] characters. The
//! `-job-{job}-attempt-{attempt}` suffix always survives; only the leading
//! prefix is truncated.

use syncwork_types::output::ConnectorOperation;

pub const MAX_POD_NAME_LEN: usize = 63;

/// Prefix of replication orchestrator pods.
pub const REPLICATION_PREFIX: &str = "replication";

/// Marker object written when a pod finishes successfully.
const SUCCEEDED_MARKER: &str = "SUCCEEDED";

/// `{prefix}-job-{job_id}-attempt-{attempt_id}`, truncating `prefix` to fit.
#[must_use]
pub fn pod_name(prefix: &str, job_id: i64, attempt_id: i64) -> String {
    let suffix = format!("-job-{job_id}-attempt-{attempt_id}");
    join_truncated(prefix, &suffix)
}

/// Replication orchestrator pod name.
#[must_use]
pub fn replication_pod_name(job_id: i64, attempt_id: i64) -> String {
    pod_name(REPLICATION_PREFIX, job_id, attempt_id)
}

/// Check/discover/spec pod name: `{image-slug}-{operation}-job-…`.
///
/// Only the image slug is truncated; the operation stays intact.
#[must_use]
pub fn connector_pod_name(
    image: &str,
    operation: ConnectorOperation,
    job_id: i64,
    attempt_id: i64,
) -> String {
    let suffix = format!("-{}-job-{job_id}-attempt-{attempt_id}", operation.as_str());
    join_truncated(&image_slug(image), &suffix)
        .trim_start_matches('-')
        .to_string()
}

/// Object key marking `pod_name` as completed.
#[must_use]
pub fn output_location(namespace: &str, pod_name: &str) -> String {
    format!("{namespace}/{pod_name}/{SUCCEEDED_MARKER}")
}

/// Image repository basename, lowercased, non-alphanumerics as `-`.
///
/// `docker.io/airbyte/source-postgres:1.2.3` → `source-postgres`.
#[must_use]
pub fn image_slug(image: &str) -> String {
    let without_digest = image.split('@').next().unwrap_or(image);
    let basename = without_digest.rsplit('/').next().unwrap_or(without_digest);
    let repository = basename.split(':').next().unwrap_or(basename);
    repository
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect()
}

fn join_truncated(prefix: &str, suffix: &str) -> String {
    let room = MAX_POD_NAME_LEN.saturating_sub(suffix.len());
    let head: String = prefix.chars().take(room).collect();
    format!("{}{suffix}", head.trim_end_matches('-'))
}
