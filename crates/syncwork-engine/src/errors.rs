//! Engine error model.

use syncwork_state::StateError;
use syncwork_types::errors::ErrorKind;
use syncwork_types::workload::{WorkloadId, WorkloadStatus};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// WorkloadError — lifecycle and dispatch failures
// ---------------------------------------------------------------------------

/// Failure of a lifecycle or dispatch operation.
///
/// Every variant maps to one [`ErrorKind`] through [`WorkloadError::kind`].
#[derive(Debug, thiserror::Error)]
pub enum WorkloadError {
    #[error("workload '{0}' not found")]
    NotFound(WorkloadId),

    #[error("workload '{id}' conflict: {reason}")]
    Conflict { id: WorkloadId, reason: String },

    #[error("workload '{id}' cannot move from {from} to {to}")]
    InvalidStatusTransition {
        id: WorkloadId,
        from: WorkloadStatus,
        to: WorkloadStatus,
    },

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Storage(#[from] StateError),
}

impl WorkloadError {
    /// Classification used for transport mapping and retry decisions.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::InvalidStatusTransition { .. } => ErrorKind::InvalidStatusTransition,
            Self::BadRequest(_) => ErrorKind::BadRequest,
            Self::Storage(_) => ErrorKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, WorkloadError>;

// ---------------------------------------------------------------------------
// RetryableError
// ---------------------------------------------------------------------------

/// A failure the durable workflow host should retry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct RetryableError {
    pub message: String,
}

impl RetryableError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// EngineError — resolver, fetcher, and activity failures
// ---------------------------------------------------------------------------

/// Failure of an engine-level activity.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Workspace lookup failed. `deleted` is set when the directory reported
    /// the workspace as gone.
    #[error("workspace {workspace_id} not found (deleted: {deleted}): {reason}")]
    WorkspaceNotFound {
        workspace_id: Uuid,
        deleted: bool,
        reason: String,
    },

    #[error("failed to fetch input for workload '{id}': {reason}")]
    InputFetch { id: WorkloadId, reason: String },

    #[error("failed to hydrate input for workload '{id}': {reason}")]
    Hydration { id: WorkloadId, reason: String },

    #[error(transparent)]
    Retryable(#[from] RetryableError),

    #[error(transparent)]
    Workload(#[from] WorkloadError),
}

impl EngineError {
    /// Whether the workflow host should retry the activity.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::WorkspaceNotFound { deleted, .. } => !deleted,
            Self::Retryable(_) => true,
            Self::Workload(e) => e.kind().is_retryable(),
            Self::InputFetch { .. } | Self::Hydration { .. } => false,
        }
    }
}
