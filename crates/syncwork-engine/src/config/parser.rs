//! Service YAML parsing with environment variable substitution.

use std::path::Path;

use anyhow::{Context, Result};

use crate::config::types::ServiceConfig;
use crate::hydrate::substitute_vars;

/// Substitute `${VAR_NAME}` patterns with environment variable values.
///
/// # Errors
///
/// Returns an error naming every referenced variable that is not set.
pub fn substitute_env_vars(input: &str) -> Result<String> {
    let mut missing = Vec::new();
    let result = substitute_vars(input, &|name| std::env::var(name).ok(), &mut missing);
    if !missing.is_empty() {
        anyhow::bail!("Missing environment variable(s): {}", missing.join(", "));
    }
    Ok(result)
}

/// Parse a service YAML string (after env var substitution).
///
/// # Errors
///
/// Returns an error if env var substitution fails or the YAML is invalid.
pub fn parse_config_str(yaml_str: &str) -> Result<ServiceConfig> {
    let substituted = substitute_env_vars(yaml_str)?;
    let config: ServiceConfig =
        serde_yaml::from_str(&substituted).context("Failed to parse service YAML")?;
    Ok(config)
}

/// Parse a service YAML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the YAML is invalid.
pub fn parse_config(path: &Path) -> Result<ServiceConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config_str(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::SignalMode;
    use syncwork_types::workload::MutexPolicy;

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("SW_TEST_DB_DIR", "/var/lib/sw");
        let result = substitute_env_vars("database: ${SW_TEST_DB_DIR}/w.db").unwrap();
        assert_eq!(result, "database: /var/lib/sw/w.db");
        std::env::remove_var("SW_TEST_DB_DIR");
    }

    #[test]
    fn test_multiple_missing_env_vars_all_reported() {
        let err = substitute_env_vars("${SW_MISSING_X} and ${SW_MISSING_Y}")
            .unwrap_err()
            .to_string();
        assert!(err.contains("SW_MISSING_X"));
        assert!(err.contains("SW_MISSING_Y"));
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse_config_str("database: /tmp/w.db\n").unwrap();
        assert_eq!(config.storage.namespace, "jobs");
        assert_eq!(config.retry.base_delay_secs, 10);
        assert_eq!(config.retry.max_delay_secs, 3600);
        assert_eq!(config.retry.multiplier, 2);
        assert_eq!(config.signal.mode, SignalMode::InProcess);
        assert_eq!(config.signal.timeout_ms, 5000);
        assert_eq!(config.dispatch.mutex_policy, MutexPolicy::Reject);
        assert_eq!(config.dispatch.claim_deadline_secs, 600);
        assert!(config.dataplane.workspaces.is_empty());
    }

    #[test]
    fn test_full_config() {
        let yaml = r"
database: /var/lib/syncwork/workloads.db
storage:
  root: /var/lib/syncwork/storage
  namespace: prod-jobs
retry:
  base_delay_secs: 30
  max_delay_secs: 1800
  multiplier: 6
signal:
  mode: remote
  timeout_ms: 250
dispatch:
  mutex_policy: supersede
  claim_deadline_secs: 120
dataplane:
  workspaces:
    5b6d4ad8-3a30-4f32-9a0e-3f5bd2a1c001: eu-west
";
        let config = parse_config_str(yaml).unwrap();
        assert_eq!(config.signal.mode, SignalMode::Remote);
        assert_eq!(config.dispatch.mutex_policy, MutexPolicy::Supersede);
        assert_eq!(
            config.retry.policy().get_backoff(4),
            std::time::Duration::from_secs(1800)
        );
        let ws: uuid::Uuid = "5b6d4ad8-3a30-4f32-9a0e-3f5bd2a1c001".parse().unwrap();
        assert_eq!(config.dataplane.workspaces[&ws], "eu-west");
    }

    #[test]
    fn test_parse_invalid_yaml_errors() {
        assert!(parse_config_str("this is not: [valid: yaml: {{{}}}").is_err());
    }

    #[test]
    fn test_unknown_signal_mode_errors() {
        assert!(parse_config_str("database: w.db\nsignal:\n  mode: carrier_pigeon\n").is_err());
    }
}
