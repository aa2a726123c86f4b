//! Storage trait abstraction.

use async_trait::async_trait;
use cortex_core::{Document, ErrorKind};
use std::path::Path;

/// Error type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The file was written by a newer, incompatible version
    #[error("unsupported snapshot version {found} (this build reads up to {supported})")]
    UnsupportedVersion {
        /// Version tag found in the file
        found: u32,
        /// Highest version this build understands
        supported: u32,
    },

    /// The file parsed but does not look like a snapshot
    #[error("malformed snapshot: {0}")]
    Malformed(String),
}

impl StorageError {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::PersistenceFailed
    }
}

/// Durable home for the documents of a vector store.
///
/// Implementations must make `save_documents` atomic: a crash mid-save
/// leaves the previously saved documents readable.
#[async_trait]
pub trait DocumentStorage: Send + Sync {
    /// Where the documents live.
    fn location(&self) -> &Path;

    /// Replace the persisted documents with `documents`.
    async fn save_documents(&self, documents: &[Document]) -> Result<()>;

    /// Read the persisted documents; nothing persisted yet yields an empty list.
    async fn load_documents(&self) -> Result<Vec<Document>>;
}
