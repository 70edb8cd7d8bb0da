//! Job output documents written by execution units.

use serde::{Deserialize, Serialize};

use crate::protocol::StreamDescriptor;
use crate::state::PersistedState;

/// Which connector operation produced an output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorOperation {
    Check,
    Discover,
    Spec,
}

impl ConnectorOperation {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Check => "check",
            Self::Discover => "discover",
            Self::Spec => "spec",
        }
    }
}

/// Result of a check, discover or spec job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorJobOutput {
    pub operation: ConnectorOperation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check_succeeded: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

/// Record and byte counts for one stream or a whole sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    pub records_emitted: u64,
    pub bytes_emitted: u64,
    pub records_committed: u64,
    pub bytes_committed: u64,
    #[serde(default)]
    pub records_filtered_out: u64,
    #[serde(default)]
    pub bytes_filtered_out: u64,
}

/// Per-stream entry of a replication output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSyncStats {
    pub stream: StreamDescriptor,
    pub stats: SyncStats,
    /// Set when the sync continued from a previously persisted checkpoint.
    #[serde(default)]
    pub was_resumed: bool,
}

/// Result of a sync job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplicationOutput {
    pub total_stats: SyncStats,
    #[serde(default)]
    pub stream_stats: Vec<StreamSyncStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<PersistedState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replication_output_defaults_missing_fields() {
        let out: ReplicationOutput = serde_json::from_str(
            r#"{"total_stats":{"records_emitted":3,"bytes_emitted":30,"records_committed":3,"bytes_committed":30}}"#,
        )
        .unwrap();
        assert!(out.stream_stats.is_empty());
        assert_eq!(out.total_stats.records_filtered_out, 0);
        assert!(out.state.is_none());
    }

    #[test]
    fn connector_output_skips_empty_fields() {
        let out = ConnectorJobOutput {
            operation: ConnectorOperation::Check,
            check_succeeded: Some(true),
            catalog: None,
            spec: None,
            failure_reason: None,
        };
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["operation"], "check");
        assert!(json.get("catalog").is_none());
    }
}
