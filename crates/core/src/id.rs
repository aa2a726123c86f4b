//! Identifiers for Cortex entities.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use ulid::Ulid;

/// Prefix of ids assigned to directly added knowledge.
pub const KNOWLEDGE_ID_PREFIX: &str = "knowledge-";

/// Unique identifier for one orchestrated query run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(Ulid);

impl RunId {
    /// Generate a new RunId
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for RunId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Document id for chunk `chunk_index` of the file at `source`.
///
/// The id is the hex SHA-256 of `"<source>#<chunk_index>"`, so the same file
/// with the same chunk layout always maps onto the same ids.
pub fn chunk_document_id(source: &Path, chunk_index: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.to_string_lossy().as_bytes());
    hasher.update(b"#");
    hasher.update(chunk_index.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Document id for the `n`-th piece of directly added knowledge.
pub fn knowledge_document_id(n: u64) -> String {
    format!("{KNOWLEDGE_ID_PREFIX}{n}")
}

/// Parse the counter back out of a [`knowledge_document_id`].
pub fn parse_knowledge_document_id(id: &str) -> Option<u64> {
    id.strip_prefix(KNOWLEDGE_ID_PREFIX)?.parse().ok()
}

/// Hex SHA-256 of a piece of text.
pub fn content_hash(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}
