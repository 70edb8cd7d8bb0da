//! Workflow signal payload.

use serde::{Deserialize, Serialize};

/// Names the workflow to notify when a workload's status changes.
///
/// Carried JSON-encoded as an opaque string on the workload record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalInput {
    pub workflow_type: String,
    pub workflow_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_format_is_camel_case() {
        let input = SignalInput {
            workflow_type: "sync".into(),
            workflow_id: "connection_manager_42".into(),
        };
        let json = serde_json::to_value(&input).unwrap();
        assert_eq!(json["workflowType"], "sync");
        assert_eq!(json["workflowId"], "connection_manager_42");
    }

    #[test]
    fn rejects_missing_workflow_id() {
        let result: Result<SignalInput, _> = serde_json::from_str(r#"{"workflowType":"sync"}"#);
        assert!(result.is_err());
    }
}
