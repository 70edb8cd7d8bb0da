//! Shared syncwork model types.
//!
//! Workload records, replication protocol messages, per-stream tracking
//! entities, job outputs, and the error-kind taxonomy. Kept free of storage
//! and runtime dependencies so the state and engine crates can share them.

pub mod errors;
pub mod output;
pub mod protocol;
pub mod signal;
pub mod state;
pub mod workload;
