//! Workload record types.
//!
//! A [`Workload`] is one dispatched unit of execution (sync, check, discover
//! or spec job) tracked through the [`WorkloadStatus`] lifecycle.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Caller-chosen, globally unique workload identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkloadId(String);

impl WorkloadId {
    /// Create a new workload identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<S: Into<String>> From<S> for WorkloadId {
    fn from(value: S) -> Self {
        Self(value.into())
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Kind of job a workload executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadType {
    Sync,
    Check,
    Discover,
    Spec,
}

impl WorkloadType {
    /// Wire-format string for storage.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::Check => "check",
            Self::Discover => "discover",
            Self::Spec => "spec",
        }
    }

    /// Parse the storage representation.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "sync" => Some(Self::Sync),
            "check" => Some(Self::Check),
            "discover" => Some(Self::Discover),
            "spec" => Some(Self::Spec),
            _ => None,
        }
    }
}

impl fmt::Display for WorkloadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduling priority. Stored as an integer so queues can order on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadPriority {
    High,
    #[default]
    Default,
}

impl WorkloadPriority {
    #[must_use]
    pub fn as_int(self) -> i64 {
        match self {
            Self::High => 1,
            Self::Default => 0,
        }
    }

    #[must_use]
    pub fn from_int(value: i64) -> Self {
        if value >= 1 {
            Self::High
        } else {
            Self::Default
        }
    }
}

/// Lifecycle status of a workload.
///
/// `PENDING → CLAIMED → LAUNCHED → RUNNING → {SUCCESS | FAILURE}`, with
/// `CANCELLED` reachable from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadStatus {
    Pending,
    Claimed,
    Launched,
    Running,
    Success,
    Failure,
    Cancelled,
}

impl WorkloadStatus {
    /// Statuses in which a workload still occupies its mutex key.
    pub const ACTIVE: [Self; 4] = [Self::Pending, Self::Claimed, Self::Launched, Self::Running];

    /// Wire-format string for storage.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Claimed => "claimed",
            Self::Launched => "launched",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse the storage representation.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "claimed" => Some(Self::Claimed),
            "launched" => Some(Self::Launched),
            "running" => Some(Self::Running),
            "success" => Some(Self::Success),
            "failure" => Some(Self::Failure),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failure | Self::Cancelled)
    }

    #[must_use]
    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }

    /// Whether `next` is reachable from `self` in a single transition.
    ///
    /// Transitions only move forward or into a terminal state. A status is
    /// never reachable from itself; equal statuses are handled as a no-op by
    /// callers.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use WorkloadStatus::{Cancelled, Claimed, Failure, Launched, Pending, Running, Success};
        match self {
            Pending => matches!(next, Claimed | Failure | Cancelled),
            Claimed => matches!(next, Launched | Running | Success | Failure | Cancelled),
            Launched => matches!(next, Running | Success | Failure | Cancelled),
            Running => matches!(next, Success | Failure | Cancelled),
            Success | Failure | Cancelled => false,
        }
    }
}

impl fmt::Display for WorkloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A persisted workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workload {
    pub id: WorkloadId,
    pub workload_type: WorkloadType,
    pub priority: WorkloadPriority,
    pub status: WorkloadStatus,
    /// Workloads sharing a mutex key never run concurrently.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mutex_key: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub input_payload: String,
    pub log_path: String,
    /// Idempotency token: resubmitting the same `auto_id` never duplicates.
    pub auto_id: Uuid,
    /// Resolved execution fleet; empty means the default group.
    #[serde(default)]
    pub dataplane_group: String,
    /// Dataplane that claimed the workload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataplane_id: Option<String>,
    /// Opaque JSON naming the workflow to notify on termination.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal_input: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination_source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields required to insert a workload. The store fills in timestamps and
/// sets the status to [`WorkloadStatus::Pending`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewWorkload {
    pub id: WorkloadId,
    pub workload_type: WorkloadType,
    pub priority: WorkloadPriority,
    pub mutex_key: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub input_payload: String,
    pub log_path: String,
    pub auto_id: Uuid,
    pub dataplane_group: String,
    pub signal_input: Option<String>,
    pub start_time_ms: Option<i64>,
    pub deadline: Option<DateTime<Utc>>,
}

/// Terminal metadata recorded alongside a status change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusChange {
    pub deadline: Option<DateTime<Utc>>,
    pub heartbeat_at: Option<DateTime<Utc>>,
    pub termination_source: Option<String>,
    pub termination_reason: Option<String>,
}

/// What creation does when another active workload holds the mutex key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutexPolicy {
    /// Refuse the new workload.
    #[default]
    Reject,
    /// Fail the current holders and create the new workload.
    Supersede,
}

/// Number of pending workloads in one logical queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub dataplane_group: String,
    pub priority: WorkloadPriority,
    pub enqueued_count: u64,
}

/// Filters for workload listing. `None` means "no filter".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkloadFilter {
    pub dataplane_ids: Option<Vec<String>>,
    pub statuses: Option<Vec<WorkloadStatus>>,
    pub updated_before: Option<DateTime<Utc>>,
}
