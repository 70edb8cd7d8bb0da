//! Store trait definitions.
//!
//! [`WorkloadStore`] persists workload records and exposes compare-and-set
//! status updates; [`StreamTrackingStore`] persists stream generations and
//! pending refreshes. Model types live in [`syncwork_types`].

use chrono::{DateTime, Utc};
use syncwork_types::protocol::StreamDescriptor;
use syncwork_types::state::{RefreshType, StreamGeneration, StreamRefresh};
use syncwork_types::workload::{
    MutexPolicy, NewWorkload, QueueStats, StatusChange, Workload, WorkloadFilter, WorkloadId,
    WorkloadPriority, WorkloadStatus,
};
use uuid::Uuid;

use crate::error;

/// Termination source recorded on workloads failed to free a mutex key.
pub const SUPERSEDED_SOURCE: &str = "workload-dispatch";

/// Result of [`WorkloadStore::insert`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The workload was created. `superseded` lists holders of the mutex key
    /// that were failed to make room, in their post-failure form.
    Created { superseded: Vec<Workload> },
    /// A workload with the same `auto_id` already exists.
    Replayed(Workload),
    /// The id is taken by a workload with a different `auto_id`.
    IdConflict,
    /// Another active workload holds the mutex key.
    MutexHeld(WorkloadId),
}

/// Storage contract for workload records.
///
/// Implementations must be `Send + Sync` for use behind `Arc<dyn WorkloadStore>`.
/// Every mutating method is atomic with respect to every other.
pub trait WorkloadStore: Send + Sync {
    /// Insert a workload in [`WorkloadStatus::Pending`].
    ///
    /// The `auto_id` replay check, the id uniqueness check, and the mutex
    /// check run in the same transaction as the insert.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn insert(&self, workload: &NewWorkload, policy: MutexPolicy) -> error::Result<InsertOutcome>;

    /// Read a workload. Returns `Ok(None)` when absent.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn get(&self, id: &WorkloadId) -> error::Result<Option<Workload>>;

    /// Compare-and-set: move `id` from `expected` to `next` only if its
    /// current status is still `expected`.
    ///
    /// `expected == next` is permitted and refreshes the fields in `change`
    /// (heartbeats). Returns `true` if the row was updated.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn compare_and_set_status(
        &self,
        id: &WorkloadId,
        expected: WorkloadStatus,
        next: WorkloadStatus,
        change: &StatusChange,
    ) -> error::Result<bool>;

    /// Atomically move a pending workload to claimed by `dataplane_id`.
    ///
    /// Returns `true` if the claim was applied.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn claim(
        &self,
        id: &WorkloadId,
        dataplane_id: &str,
        deadline: Option<DateTime<Utc>>,
    ) -> error::Result<bool>;

    /// List workloads matching `filter`, ordered by creation time.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn list(&self, filter: &WorkloadFilter) -> error::Result<Vec<Workload>>;

    /// List workloads whose deadline is strictly before `cutoff`.
    ///
    /// `statuses` defaults to the active statuses when `None`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn list_expired_deadline(
        &self,
        dataplane_ids: Option<&[String]>,
        statuses: Option<&[WorkloadStatus]>,
        cutoff: DateTime<Utc>,
    ) -> error::Result<Vec<Workload>>;

    /// Oldest pending workloads of a logical queue.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn pending(
        &self,
        dataplane_group: Option<&str>,
        priority: Option<WorkloadPriority>,
        limit: usize,
    ) -> error::Result<Vec<Workload>>;

    /// Count pending workloads of a logical queue.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn count_pending(
        &self,
        dataplane_group: Option<&str>,
        priority: Option<WorkloadPriority>,
    ) -> error::Result<u64>;

    /// Pending counts per (dataplane group, priority).
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn queue_stats(&self) -> error::Result<Vec<QueueStats>>;
}

/// Storage contract for stream generations and pending refreshes.
pub trait StreamTrackingStore: Send + Sync {
    /// Latest generation of every stream of a connection.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn current_generations(&self, connection_id: Uuid) -> error::Result<Vec<StreamGeneration>>;

    /// Start a new generation for each stream, begun by `job_id`.
    ///
    /// A stream without history starts at generation 1.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn increment_generations(
        &self,
        connection_id: Uuid,
        streams: &[StreamDescriptor],
        job_id: i64,
    ) -> error::Result<Vec<StreamGeneration>>;

    /// Record a pending refresh per stream. Existing requests are kept.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn request_refresh(
        &self,
        connection_id: Uuid,
        streams: &[StreamDescriptor],
        refresh_type: RefreshType,
    ) -> error::Result<()>;

    /// Pending refreshes of a connection.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn pending_refreshes(&self, connection_id: Uuid) -> error::Result<Vec<StreamRefresh>>;

    /// Delete and return the pending refreshes for `streams`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn consume_refreshes(
        &self,
        connection_id: Uuid,
        streams: &[StreamDescriptor],
    ) -> error::Result<Vec<StreamRefresh>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Verify the traits are object-safe.
    #[test]
    fn traits_are_object_safe() {
        fn _assert_workload_store(_: &dyn WorkloadStore) {}
        fn _assert_tracking_store(_: &dyn StreamTrackingStore) {}
    }
}
