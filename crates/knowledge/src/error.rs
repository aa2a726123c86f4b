//! Knowledge error type.

use cortex_backend::BackendError;
use cortex_core::{ConfigError, ErrorKind};
use cortex_storage::StorageError;
use std::path::PathBuf;

/// Error type for knowledge operations.
pub type Result<T> = std::result::Result<T, KnowledgeError>;

/// Errors raised while indexing, persisting or searching knowledge.
#[derive(Debug, thiserror::Error)]
pub enum KnowledgeError {
    /// Invalid indexer configuration
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// A source file could not be read
    #[error("failed to read {path}: {source}")]
    Read {
        /// File that failed
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Directory walk failed
    #[error("failed to walk {path}: {message}")]
    Traversal {
        /// Directory being walked
        path: PathBuf,
        /// What went wrong
        message: String,
    },

    /// Saving or loading the store failed
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The embedding backend failed
    #[error("embedding failed: {0}")]
    Backend(#[from] BackendError),

    /// Query-time search failed
    #[error("retrieval failed: {0}")]
    Retrieval(String),
}

impl KnowledgeError {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            KnowledgeError::Config(e) => e.kind(),
            KnowledgeError::Read { .. } | KnowledgeError::Traversal { .. } => {
                ErrorKind::ExecutionFailed
            }
            KnowledgeError::Storage(e) => e.kind(),
            KnowledgeError::Backend(e) => e.kind(),
            KnowledgeError::Retrieval(_) => ErrorKind::RetrievalFailed,
        }
    }
}
