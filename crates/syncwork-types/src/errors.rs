//! Error-kind taxonomy shared across crates.
//!
//! Internal code branches on [`ErrorKind`]; the transport status is derived
//! from it in exactly one place, [`ErrorKind::http_status`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of a dispatch/lifecycle outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Referenced workload/stream/generation does not exist.
    NotFound,
    /// Collides with exclusive state (mutex key, claim ownership, id reuse).
    Conflict,
    /// Idempotent replay matching the current state. Callers treat it as success.
    NotModified,
    /// Requested status is not reachable from the current one.
    InvalidStatusTransition,
    /// Request failed validation.
    BadRequest,
    /// Storage or other internal failure.
    Internal,
}

impl ErrorKind {
    /// Transport status code for this kind.
    #[must_use]
    pub fn http_status(self) -> u16 {
        match self {
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::NotModified => 304,
            Self::InvalidStatusTransition => 410,
            Self::BadRequest => 400,
            Self::Internal => 500,
        }
    }

    /// Whether a caller may retry the same request unchanged.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Conflict | Self::Internal)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::NotModified => "not_modified",
            Self::InvalidStatusTransition => "invalid_status_transition",
            Self::BadRequest => "bad_request",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}
