//! Workload dispatch and replication-checkpoint core for syncwork.
//!
//! The lifecycle handler drives workloads through their state machine on top
//! of a [`syncwork_state::WorkloadStore`]; the remaining modules cover the
//! collaborators around it (dispatch, dataplane resolution, worker input,
//! signals, checkpoint enrichment, naming, and job output storage).

pub mod backoff;
pub mod checkpoint;
pub mod config;
pub mod dataplane;
pub mod dispatch;
pub mod docstore;
pub mod errors;
pub mod hydrate;
pub mod input_fetcher;
pub mod lifecycle;
pub mod metrics;
pub mod naming;
pub mod resumed;
pub mod signal;
pub mod stats;

// Re-export public API for convenience
pub use backoff::{with_deadline, BackoffPolicy};
pub use checkpoint::{CheckpointEnricher, CheckpointIdSequence, EnrichError};
pub use dispatch::{DispatchClient, LauncherInputMessage};
pub use errors::{EngineError, RetryableError, WorkloadError};
pub use lifecycle::{CreateOutcome, TransitionOutcome, WorkloadHandler};
