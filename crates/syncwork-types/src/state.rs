//! Per-stream tracking entities and persisted connection state.
//!
//! Pure data types used by tracking-store implementations and the
//! replication pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::protocol::{GlobalState, StreamDescriptor, StreamState};

// ---------------------------------------------------------------------------
// Generations
// ---------------------------------------------------------------------------

/// Full-refresh epoch of one stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamGeneration {
    pub connection_id: Uuid,
    pub stream: StreamDescriptor,
    /// Increases by one every time the stream's history is invalidated.
    pub generation_id: i64,
    /// Job that began this generation.
    pub start_job_id: i64,
}

// ---------------------------------------------------------------------------
// Refreshes
// ---------------------------------------------------------------------------

/// How a refreshed stream treats existing destination data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshType {
    Truncate,
    Merge,
}

impl RefreshType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Truncate => "truncate",
            Self::Merge => "merge",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "truncate" => Some(Self::Truncate),
            "merge" => Some(Self::Merge),
            _ => None,
        }
    }
}

/// Pending request to reload one stream's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRefresh {
    pub connection_id: Uuid,
    pub stream: StreamDescriptor,
    pub refresh_type: RefreshType,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Persisted state
// ---------------------------------------------------------------------------

/// Connection state saved at the end of a previous sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state_type", content = "state", rename_all = "snake_case")]
pub enum PersistedState {
    Stream(Vec<StreamState>),
    Global(GlobalState),
    Legacy(serde_json::Value),
}
