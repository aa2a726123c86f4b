//! Orchestration error type.

use cortex_backend::BackendError;
use cortex_core::{ConfigError, ErrorKind};
use cortex_knowledge::KnowledgeError;
use std::time::Duration;

/// Error type for queries and assistant operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Why a query (or an assistant operation) failed.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// The chat backend failed; fatal for the current query
    #[error("chat backend failed: {0}")]
    Backend(#[from] BackendError),

    /// A backend call exceeded its deadline
    #[error("chat request timed out after {0:?}")]
    Timeout(Duration),

    /// The caller cancelled the query
    #[error("query cancelled")]
    Cancelled,

    /// Indexing or persistence failed
    #[error(transparent)]
    Knowledge(#[from] KnowledgeError),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

impl OrchestratorError {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrchestratorError::Backend(e) => e.kind(),
            OrchestratorError::Timeout(_) => ErrorKind::Timeout,
            OrchestratorError::Cancelled => ErrorKind::Cancelled,
            OrchestratorError::Knowledge(e) => e.kind(),
            OrchestratorError::Config(e) => e.kind(),
        }
    }
}
