//! Dispatch client: turns a launcher input message into a pending workload.

use std::collections::BTreeMap;
use std::sync::Arc;

use syncwork_types::workload::{NewWorkload, WorkloadId, WorkloadPriority, WorkloadType};
use uuid::Uuid;

use crate::dataplane::DataplaneResolver;
use crate::errors::{EngineError, WorkloadError};
use crate::lifecycle::{CreateOutcome, WorkloadHandler};

/// Everything needed to enqueue one workload.
///
/// Built through [`LauncherInputMessage::builder`], which checks the required
/// fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LauncherInputMessage {
    pub workload_id: WorkloadId,
    pub workload_input: String,
    pub labels: BTreeMap<String, String>,
    pub log_path: String,
    pub workload_type: WorkloadType,
    pub auto_id: Uuid,
    pub priority: WorkloadPriority,
    pub mutex_key: Option<String>,
    pub start_time_ms: Option<i64>,
    pub signal_input: Option<String>,
    pub organization_id: Option<Uuid>,
    pub workspace_id: Option<Uuid>,
    pub connection_id: Option<Uuid>,
}

impl LauncherInputMessage {
    #[must_use]
    pub fn builder() -> LauncherInputMessageBuilder {
        LauncherInputMessageBuilder::default()
    }
}

/// Builder for [`LauncherInputMessage`].
#[derive(Debug, Default, Clone)]
pub struct LauncherInputMessageBuilder {
    workload_id: Option<WorkloadId>,
    workload_input: Option<String>,
    labels: Option<BTreeMap<String, String>>,
    log_path: Option<String>,
    workload_type: Option<WorkloadType>,
    auto_id: Option<Uuid>,
    priority: WorkloadPriority,
    mutex_key: Option<String>,
    start_time_ms: Option<i64>,
    signal_input: Option<String>,
    organization_id: Option<Uuid>,
    workspace_id: Option<Uuid>,
    connection_id: Option<Uuid>,
}

impl LauncherInputMessageBuilder {
    #[must_use]
    pub fn workload_id(mut self, id: impl Into<WorkloadId>) -> Self {
        self.workload_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn workload_input(mut self, input: impl Into<String>) -> Self {
        self.workload_input = Some(input.into());
        self
    }

    #[must_use]
    pub fn labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels = Some(labels);
        self
    }

    #[must_use]
    pub fn log_path(mut self, path: impl Into<String>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn workload_type(mut self, workload_type: WorkloadType) -> Self {
        self.workload_type = Some(workload_type);
        self
    }

    #[must_use]
    pub fn auto_id(mut self, auto_id: Uuid) -> Self {
        self.auto_id = Some(auto_id);
        self
    }

    #[must_use]
    pub fn priority(mut self, priority: WorkloadPriority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn mutex_key(mut self, key: Option<String>) -> Self {
        self.mutex_key = key;
        self
    }

    #[must_use]
    pub fn start_time_ms(mut self, start_time_ms: Option<i64>) -> Self {
        self.start_time_ms = start_time_ms;
        self
    }

    #[must_use]
    pub fn signal_input(mut self, signal_input: Option<String>) -> Self {
        self.signal_input = signal_input;
        self
    }

    #[must_use]
    pub fn organization_id(mut self, id: Option<Uuid>) -> Self {
        self.organization_id = id;
        self
    }

    #[must_use]
    pub fn workspace_id(mut self, id: Option<Uuid>) -> Self {
        self.workspace_id = id;
        self
    }

    #[must_use]
    pub fn connection_id(mut self, id: Option<Uuid>) -> Self {
        self.connection_id = id;
        self
    }

    /// Validate and build. Every missing required field is reported at once.
    ///
    /// # Errors
    ///
    /// Returns [`WorkloadError::BadRequest`] naming the missing fields.
    pub fn build(self) -> Result<LauncherInputMessage, WorkloadError> {
        let mut missing = Vec::new();
        if self.workload_id.as_ref().map_or(true, |id| id.as_str().trim().is_empty()) {
            missing.push("workload_id");
        }
        if self.workload_input.is_none() {
            missing.push("workload_input");
        }
        if self.labels.is_none() {
            missing.push("labels");
        }
        if self.log_path.as_deref().map_or(true, |p| p.trim().is_empty()) {
            missing.push("log_path");
        }
        if self.workload_type.is_none() {
            missing.push("workload_type");
        }
        if self.auto_id.is_none() {
            missing.push("auto_id");
        }

        match (
            self.workload_id,
            self.workload_input,
            self.labels,
            self.log_path,
            self.workload_type,
            self.auto_id,
        ) {
            (
                Some(workload_id),
                Some(workload_input),
                Some(labels),
                Some(log_path),
                Some(workload_type),
                Some(auto_id),
            ) if missing.is_empty() => Ok(LauncherInputMessage {
                workload_id,
                workload_input,
                labels,
                log_path,
                workload_type,
                auto_id,
                priority: self.priority,
                mutex_key: self.mutex_key,
                start_time_ms: self.start_time_ms,
                signal_input: self.signal_input,
                organization_id: self.organization_id,
                workspace_id: self.workspace_id,
                connection_id: self.connection_id,
            }),
            _ => Err(WorkloadError::BadRequest(format!(
                "missing required field(s): {}",
                missing.join(", ")
            ))),
        }
    }
}

/// Submits launcher input messages as pending workloads.
pub struct DispatchClient {
    handler: Arc<WorkloadHandler>,
    resolver: DataplaneResolver,
}

impl DispatchClient {
    pub fn new(handler: Arc<WorkloadHandler>, resolver: DataplaneResolver) -> Self {
        Self { handler, resolver }
    }

    /// Resolve the dataplane group and create the workload.
    ///
    /// Resubmitting a message with a known `auto_id` returns the existing
    /// workload's id.
    ///
    /// # Errors
    ///
    /// - [`EngineError::WorkspaceNotFound`] if group resolution fails.
    /// - [`EngineError::Workload`] with `Conflict` on id reuse or a held
    ///   mutex key.
    pub fn dispatch(&self, message: LauncherInputMessage) -> Result<WorkloadId, EngineError> {
        let dataplane_group = self.resolve_group(&message)?;
        let new = NewWorkload {
            id: message.workload_id,
            workload_type: message.workload_type,
            priority: message.priority,
            mutex_key: message.mutex_key,
            labels: message.labels,
            input_payload: message.workload_input,
            log_path: message.log_path,
            auto_id: message.auto_id,
            dataplane_group,
            signal_input: message.signal_input,
            start_time_ms: message.start_time_ms,
            deadline: None,
        };

        let outcome = self.handler.create(&new)?;
        if let CreateOutcome::Replayed(existing) = &outcome {
            tracing::info!(
                workload_id = %existing.id,
                requested_id = %new.id,
                "Dispatch replayed, returning existing workload"
            );
        }
        Ok(outcome.workload().id.clone())
    }

    fn resolve_group(&self, message: &LauncherInputMessage) -> Result<String, EngineError> {
        let Some(workspace_id) = message.workspace_id else {
            return Ok(String::new());
        };
        let org = message.organization_id;
        match message.workload_type {
            WorkloadType::Sync => {
                self.resolver
                    .resolve_for_sync(org, workspace_id, message.connection_id)
            }
            WorkloadType::Check => self.resolver.resolve_for_check(org, workspace_id),
            WorkloadType::Discover => self.resolver.resolve_for_discover(org, workspace_id),
            WorkloadType::Spec => self.resolver.resolve_for_spec(org, workspace_id),
        }
    }
}
