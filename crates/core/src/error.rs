//! Error taxonomy shared across crates.
//!
//! Every crate owns its own error enum; each of them maps onto one
//! [`ErrorKind`] so callers can apply the propagation policy without
//! matching on crate-specific variants.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Broad category of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed capability arguments or configuration values
    InvalidInput,
    /// A capability ran but failed
    ExecutionFailed,
    /// The caller's grant does not cover the operation
    PermissionDenied,
    /// Unknown capability name
    NotFound,
    /// Embedding or search failure during retrieval (never fatal)
    RetrievalFailed,
    /// I/O or serialization failure while saving or loading
    PersistenceFailed,
    /// The model backend could not complete a call
    BackendUnavailable,
    /// The caller cancelled the operation
    Cancelled,
    /// The operation exceeded its deadline
    Timeout,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::InvalidInput => "invalid input",
            ErrorKind::ExecutionFailed => "execution failed",
            ErrorKind::PermissionDenied => "permission denied",
            ErrorKind::NotFound => "not found",
            ErrorKind::RetrievalFailed => "retrieval failed",
            ErrorKind::PersistenceFailed => "persistence failed",
            ErrorKind::BackendUnavailable => "backend unavailable",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

/// Invalid configuration value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A value that must be positive was zero
    #[error("{0} must be greater than zero")]
    NotPositive(&'static str),

    /// Overlap must stay below the chunk size
    #[error("chunk_overlap ({overlap}) must be smaller than chunk_size ({size})")]
    OverlapTooLarge {
        /// Configured chunk size
        size: usize,
        /// Configured overlap
        overlap: usize,
    },
}

impl ConfigError {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidInput
    }
}
