//! Workload lifecycle state machine.
//!
//! [`WorkloadHandler`] validates every transition against the current status
//! and applies it with a compare-and-set on the store. A lost compare-and-set
//! re-reads the workload and decides again, so concurrent callers resolve to
//! one applied transition and one idempotent or rejected outcome.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use syncwork_state::{InsertOutcome, WorkloadStore};
use syncwork_types::workload::{
    MutexPolicy, NewWorkload, QueueStats, StatusChange, Workload, WorkloadFilter, WorkloadId,
    WorkloadPriority, WorkloadStatus,
};

use crate::errors::{Result, WorkloadError};
use crate::signal::SignalNotifier;

/// Statuses only move forward, so a workload can lose at most this many
/// compare-and-set races before it settles.
const MAX_CAS_ATTEMPTS: usize = 8;

/// Result of a lifecycle transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The transition was applied. Holds the updated workload.
    Applied(Workload),
    /// The workload already was in the requested state. Nothing was written.
    NotModified(Workload),
}

impl TransitionOutcome {
    #[must_use]
    pub fn workload(&self) -> &Workload {
        match self {
            Self::Applied(w) | Self::NotModified(w) => w,
        }
    }

    #[must_use]
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

/// Result of [`WorkloadHandler::create`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Created(Workload),
    /// The `auto_id` was seen before; holds the existing workload.
    Replayed(Workload),
}

impl CreateOutcome {
    #[must_use]
    pub fn workload(&self) -> &Workload {
        match self {
            Self::Created(w) | Self::Replayed(w) => w,
        }
    }
}

/// What a transition rule decided for the current workload.
enum Decision {
    Apply {
        next: WorkloadStatus,
        change: StatusChange,
    },
    NotModified,
}

/// Drives workloads through their lifecycle.
pub struct WorkloadHandler {
    store: Arc<dyn WorkloadStore>,
    signals: Arc<dyn SignalNotifier>,
    mutex_policy: MutexPolicy,
}

impl WorkloadHandler {
    pub fn new(store: Arc<dyn WorkloadStore>, signals: Arc<dyn SignalNotifier>) -> Self {
        Self {
            store,
            signals,
            mutex_policy: MutexPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_mutex_policy(mut self, policy: MutexPolicy) -> Self {
        self.mutex_policy = policy;
        self
    }

    // -----------------------------------------------------------------------
    // Creation
    // -----------------------------------------------------------------------

    /// Create a pending workload.
    ///
    /// # Errors
    ///
    /// - [`WorkloadError::Conflict`] if the id is taken under another
    ///   `auto_id`, or the mutex key is held and the policy is `Reject`.
    /// - [`WorkloadError::Storage`] on storage failure.
    pub fn create(&self, workload: &NewWorkload) -> Result<CreateOutcome> {
        match self.store.insert(workload, self.mutex_policy)? {
            InsertOutcome::Created { superseded } => {
                for holder in &superseded {
                    tracing::warn!(
                        workload_id = %holder.id,
                        superseded_by = %workload.id,
                        mutex_key = holder.mutex_key.as_deref().unwrap_or_default(),
                        "Failed workload holding mutex key"
                    );
                    self.notify(holder);
                }
                let created = self.load(&workload.id)?;
                tracing::info!(
                    workload_id = %created.id,
                    workload_type = %created.workload_type,
                    dataplane_group = created.dataplane_group,
                    "Workload created"
                );
                Ok(CreateOutcome::Created(created))
            }
            InsertOutcome::Replayed(existing) => {
                tracing::info!(
                    workload_id = %existing.id,
                    auto_id = %workload.auto_id,
                    "Workload creation replayed"
                );
                Ok(CreateOutcome::Replayed(existing))
            }
            InsertOutcome::IdConflict => Err(WorkloadError::Conflict {
                id: workload.id.clone(),
                reason: "id already used by a different auto_id".into(),
            }),
            InsertOutcome::MutexHeld(holder) => Err(WorkloadError::Conflict {
                id: workload.id.clone(),
                reason: format!(
                    "mutex key '{}' is held by active workload '{holder}'",
                    workload.mutex_key.as_deref().unwrap_or_default()
                ),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    /// Claim a pending workload for `dataplane_id`.
    ///
    /// # Errors
    ///
    /// - [`WorkloadError::NotFound`] for an unknown id.
    /// - [`WorkloadError::Conflict`] if another dataplane claimed it, or it
    ///   already launched.
    /// - [`WorkloadError::InvalidStatusTransition`] if it is terminal.
    pub fn claim(
        &self,
        id: &WorkloadId,
        dataplane_id: &str,
        deadline: Option<DateTime<Utc>>,
    ) -> Result<TransitionOutcome> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = self.load(id)?;
            match current.status {
                WorkloadStatus::Pending => {
                    if self.store.claim(id, dataplane_id, deadline)? {
                        let claimed = self.load(id)?;
                        tracing::info!(workload_id = %id, dataplane_id, "Workload claimed");
                        return Ok(TransitionOutcome::Applied(claimed));
                    }
                }
                WorkloadStatus::Claimed
                    if current.dataplane_id.as_deref() == Some(dataplane_id) =>
                {
                    return Ok(TransitionOutcome::NotModified(current));
                }
                WorkloadStatus::Claimed | WorkloadStatus::Launched | WorkloadStatus::Running => {
                    return Err(WorkloadError::Conflict {
                        id: id.clone(),
                        reason: format!(
                            "already {} by dataplane '{}'",
                            current.status,
                            current.dataplane_id.as_deref().unwrap_or_default()
                        ),
                    });
                }
                terminal => {
                    return Err(WorkloadError::InvalidStatusTransition {
                        id: id.clone(),
                        from: terminal,
                        to: WorkloadStatus::Claimed,
                    });
                }
            }
        }
        Err(contended(id))
    }

    /// Move a workload to `status`.
    ///
    /// `Claimed` is only reachable through [`WorkloadHandler::claim`].
    ///
    /// # Errors
    ///
    /// - [`WorkloadError::NotFound`] for an unknown id.
    /// - [`WorkloadError::InvalidStatusTransition`] if `status` is unreachable.
    pub fn set_status(&self, id: &WorkloadId, status: WorkloadStatus) -> Result<TransitionOutcome> {
        self.transition(id, status, |current| {
            if current.status == status {
                Some(Decision::NotModified)
            } else if status != WorkloadStatus::Claimed && current.status.can_transition_to(status) {
                Some(Decision::Apply {
                    next: status,
                    change: StatusChange::default(),
                })
            } else {
                None
            }
        })
    }

    /// The execution unit was launched.
    ///
    /// # Errors
    ///
    /// See [`WorkloadHandler::set_status`].
    pub fn launched(
        &self,
        id: &WorkloadId,
        deadline: Option<DateTime<Utc>>,
    ) -> Result<TransitionOutcome> {
        self.transition(id, WorkloadStatus::Launched, |current| match current.status {
            WorkloadStatus::Claimed => Some(Decision::Apply {
                next: WorkloadStatus::Launched,
                change: StatusChange {
                    deadline,
                    ..StatusChange::default()
                },
            }),
            WorkloadStatus::Launched | WorkloadStatus::Running => Some(Decision::NotModified),
            _ => None,
        })
    }

    /// The execution unit started running.
    ///
    /// # Errors
    ///
    /// See [`WorkloadHandler::set_status`].
    pub fn running(
        &self,
        id: &WorkloadId,
        deadline: Option<DateTime<Utc>>,
    ) -> Result<TransitionOutcome> {
        self.transition(id, WorkloadStatus::Running, |current| match current.status {
            WorkloadStatus::Claimed | WorkloadStatus::Launched => Some(Decision::Apply {
                next: WorkloadStatus::Running,
                change: StatusChange {
                    deadline,
                    ..StatusChange::default()
                },
            }),
            WorkloadStatus::Running => Some(Decision::NotModified),
            _ => None,
        })
    }

    /// Liveness report from a running execution unit.
    ///
    /// Always applied while the workload is claimed, launched or running.
    ///
    /// # Errors
    ///
    /// [`WorkloadError::InvalidStatusTransition`] in any other state; the
    /// worker should stop.
    pub fn heartbeat(
        &self,
        id: &WorkloadId,
        deadline: Option<DateTime<Utc>>,
    ) -> Result<TransitionOutcome> {
        self.transition(id, WorkloadStatus::Running, |current| match current.status {
            WorkloadStatus::Claimed | WorkloadStatus::Launched | WorkloadStatus::Running => {
                Some(Decision::Apply {
                    next: WorkloadStatus::Running,
                    change: StatusChange {
                        deadline,
                        heartbeat_at: Some(Utc::now()),
                        ..StatusChange::default()
                    },
                })
            }
            _ => None,
        })
    }

    /// # Errors
    ///
    /// See [`WorkloadHandler::set_status`].
    pub fn succeed(&self, id: &WorkloadId) -> Result<TransitionOutcome> {
        self.transition(id, WorkloadStatus::Success, |current| match current.status {
            WorkloadStatus::Claimed | WorkloadStatus::Launched | WorkloadStatus::Running => {
                Some(Decision::Apply {
                    next: WorkloadStatus::Success,
                    change: StatusChange::default(),
                })
            }
            WorkloadStatus::Success => Some(Decision::NotModified),
            _ => None,
        })
    }

    /// # Errors
    ///
    /// See [`WorkloadHandler::set_status`].
    pub fn fail(
        &self,
        id: &WorkloadId,
        source: Option<&str>,
        reason: Option<&str>,
    ) -> Result<TransitionOutcome> {
        self.terminate(id, WorkloadStatus::Failure, source, reason)
    }

    /// # Errors
    ///
    /// See [`WorkloadHandler::set_status`].
    pub fn cancel(
        &self,
        id: &WorkloadId,
        source: Option<&str>,
        reason: Option<&str>,
    ) -> Result<TransitionOutcome> {
        self.terminate(id, WorkloadStatus::Cancelled, source, reason)
    }

    fn terminate(
        &self,
        id: &WorkloadId,
        target: WorkloadStatus,
        source: Option<&str>,
        reason: Option<&str>,
    ) -> Result<TransitionOutcome> {
        self.transition(id, target, |current| {
            if current.status == target {
                Some(Decision::NotModified)
            } else if current.status.is_active() {
                Some(Decision::Apply {
                    next: target,
                    change: StatusChange {
                        termination_source: source.map(str::to_string),
                        termination_reason: reason.map(str::to_string),
                        ..StatusChange::default()
                    },
                })
            } else {
                None
            }
        })
    }

    /// Read, decide, compare-and-set; repeat on a lost race.
    ///
    /// `decide` returns `None` when `target` is unreachable from the current
    /// status.
    fn transition(
        &self,
        id: &WorkloadId,
        target: WorkloadStatus,
        decide: impl Fn(&Workload) -> Option<Decision>,
    ) -> Result<TransitionOutcome> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = self.load(id)?;
            let (next, change) = match decide(&current) {
                Some(Decision::Apply { next, change }) => (next, change),
                Some(Decision::NotModified) => return Ok(TransitionOutcome::NotModified(current)),
                None => {
                    return Err(WorkloadError::InvalidStatusTransition {
                        id: id.clone(),
                        from: current.status,
                        to: target,
                    })
                }
            };

            if self
                .store
                .compare_and_set_status(id, current.status, next, &change)?
            {
                let updated = self.load(id)?;
                if current.status != next {
                    tracing::info!(
                        workload_id = %id,
                        from = %current.status,
                        to = %next,
                        "Workload status changed"
                    );
                }
                if next.is_terminal() {
                    self.notify(&updated);
                }
                return Ok(TransitionOutcome::Applied(updated));
            }
            tracing::debug!(workload_id = %id, "Lost status race, re-reading");
        }
        Err(contended(id))
    }

    fn notify(&self, workload: &Workload) {
        if let Some(payload) = &workload.signal_input {
            self.signals
                .notify(&workload.id, workload.workload_type, payload);
        }
    }

    fn load(&self, id: &WorkloadId) -> Result<Workload> {
        self.store
            .get(id)?
            .ok_or_else(|| WorkloadError::NotFound(id.clone()))
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// # Errors
    ///
    /// [`WorkloadError::NotFound`] for an unknown id.
    pub fn get(&self, id: &WorkloadId) -> Result<Workload> {
        self.load(id)
    }

    /// # Errors
    ///
    /// [`WorkloadError::Storage`] on storage failure.
    pub fn list(&self, filter: &WorkloadFilter) -> Result<Vec<Workload>> {
        Ok(self.store.list(filter)?)
    }

    /// Active workloads whose deadline is strictly before `cutoff`.
    ///
    /// # Errors
    ///
    /// [`WorkloadError::Storage`] on storage failure.
    pub fn list_expired_deadline(
        &self,
        dataplane_ids: Option<&[String]>,
        statuses: Option<&[WorkloadStatus]>,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Workload>> {
        Ok(self
            .store
            .list_expired_deadline(dataplane_ids, statuses, cutoff)?)
    }

    /// Oldest pending workloads of a queue.
    ///
    /// # Errors
    ///
    /// [`WorkloadError::Storage`] on storage failure.
    pub fn poll_pending(
        &self,
        dataplane_group: Option<&str>,
        priority: Option<WorkloadPriority>,
        limit: usize,
    ) -> Result<Vec<Workload>> {
        Ok(self.store.pending(dataplane_group, priority, limit)?)
    }

    /// # Errors
    ///
    /// [`WorkloadError::Storage`] on storage failure.
    pub fn count_pending(
        &self,
        dataplane_group: Option<&str>,
        priority: Option<WorkloadPriority>,
    ) -> Result<u64> {
        Ok(self.store.count_pending(dataplane_group, priority)?)
    }

    /// # Errors
    ///
    /// [`WorkloadError::Storage`] on storage failure.
    pub fn queue_stats(&self) -> Result<Vec<QueueStats>> {
        Ok(self.store.queue_stats()?)
    }
}

fn contended(id: &WorkloadId) -> WorkloadError {
    WorkloadError::Conflict {
        id: id.clone(),
        reason: "too many concurrent status updates".into(),
    }
}
