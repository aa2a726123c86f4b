//! JSON snapshot file storage.
//!
//! The whole store is written as one JSON document carrying a schema
//! version tag. Writes go to a sibling temp file that is renamed over the
//! target, so readers only ever observe a complete snapshot.

use super::{DocumentStorage, Result, StorageError};
use cortex_core::{Document, Time};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Snapshot schema version written by this build.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Serializable representation of the vector store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSnapshot {
    /// Schema version
    pub version: u32,
    /// When the snapshot was written
    pub saved_at: Time,
    /// All documents, embeddings included
    pub documents: Vec<Document>,
}

impl StoreSnapshot {
    /// Snapshot of `documents` at the current version.
    pub fn new(documents: Vec<Document>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            saved_at: chrono::Utc::now(),
            documents,
        }
    }
}

/// Only the version tag, read before committing to the full layout.
#[derive(Deserialize)]
struct VersionProbe {
    version: Option<u32>,
}

/// Snapshot file storage backend.
#[derive(Debug, Clone)]
pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    /// Storage backed by the file at `path`. Nothing is touched until the first save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "snapshot".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait::async_trait]
impl DocumentStorage for JsonFileStorage {
    fn location(&self) -> &Path {
        &self.path
    }

    async fn save_documents(&self, documents: &[Document]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let snapshot = StoreSnapshot::new(documents.to_vec());
        let json = serde_json::to_vec_pretty(&snapshot)?;

        let tmp_path = self.temp_path();
        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(&json).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp_path, &self.path).await?;

        debug!(
            "Saved {} documents to {}",
            documents.len(),
            self.path.display()
        );
        Ok(())
    }

    async fn load_documents(&self) -> Result<Vec<Document>> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No snapshot at {}, starting empty", self.path.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let probe: VersionProbe = serde_json::from_slice(&bytes)?;
        match probe.version {
            None => {
                return Err(StorageError::Malformed(format!(
                    "{} has no version tag",
                    self.path.display()
                )))
            }
            Some(0) => {
                return Err(StorageError::Malformed(format!(
                    "{} has invalid version 0",
                    self.path.display()
                )))
            }
            Some(found) if found > SNAPSHOT_VERSION => {
                return Err(StorageError::UnsupportedVersion {
                    found,
                    supported: SNAPSHOT_VERSION,
                })
            }
            Some(_) => {}
        }

        let snapshot: StoreSnapshot = serde_json::from_slice(&bytes)?;
        debug!(
            "Loaded {} documents from {}",
            snapshot.documents.len(),
            self.path.display()
        );
        Ok(snapshot.documents)
    }
}
