//! Persistence for the syncwork dispatch core.
//!
//! Provides the [`WorkloadStore`] and [`StreamTrackingStore`] traits and a
//! [`SqliteStore`] implementing both.

#![warn(clippy::pedantic)]

pub mod backend;
pub mod error;
pub mod sqlite;
mod tracking;

pub use backend::{InsertOutcome, StreamTrackingStore, WorkloadStore};
pub use error::StateError;
pub use sqlite::SqliteStore;
