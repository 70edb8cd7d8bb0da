//! Semantic validation for parsed service configuration values.

use anyhow::{bail, Result};

use crate::config::types::ServiceConfig;

/// Validate a parsed service configuration.
/// Returns `Ok(())` if valid, Err with all validation errors if not.
///
/// # Errors
///
/// Returns an error listing all validation failures found in the config.
pub fn validate_config(config: &ServiceConfig) -> Result<()> {
    let mut errors = Vec::new();

    if config.database.as_os_str().is_empty() {
        errors.push("database path must not be empty".to_string());
    }

    let namespace = config.storage.namespace.trim();
    if namespace.is_empty() {
        errors.push("storage.namespace must not be empty".to_string());
    } else if namespace.contains('/') || namespace.contains("..") {
        errors.push(format!(
            "storage.namespace '{}' must be a single path segment",
            config.storage.namespace
        ));
    }

    let retry = &config.retry;
    if retry.multiplier == 0 {
        errors.push("retry.multiplier must be >= 1".to_string());
    }
    if retry.max_delay_secs < retry.base_delay_secs {
        errors.push(format!(
            "retry.max_delay_secs ({}) must be >= retry.base_delay_secs ({})",
            retry.max_delay_secs, retry.base_delay_secs
        ));
    }

    if config.signal.timeout_ms == 0 {
        errors.push("signal.timeout_ms must be > 0".to_string());
    }

    if config.dispatch.claim_deadline_secs == 0 {
        errors.push("dispatch.claim_deadline_secs must be > 0".to_string());
    }

    for (workspace_id, group) in &config.dataplane.workspaces {
        if group.trim().is_empty() {
            errors.push(format!(
                "dataplane.workspaces.{workspace_id}: group must not be empty"
            ));
        }
    }

    if !errors.is_empty() {
        bail!(
            "Service config validation failed:\n  - {}",
            errors.join("\n  - ")
        );
    }

    Ok(())
}
