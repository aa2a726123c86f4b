//! Document model - embedded units of knowledge.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metadata keys written by the indexer.
pub mod metadata_keys {
    /// Canonical source path, or `"knowledge"` for directly added knowledge
    pub const SOURCE: &str = "source";
    /// Zero-based position of the chunk within its source
    pub const CHUNK_INDEX: &str = "chunk_index";
    /// Number of chunks the source produced when it was indexed
    pub const CHUNK_COUNT: &str = "chunk_count";
    /// Hex SHA-256 of the chunk content
    pub const CONTENT_HASH: &str = "content_hash";
    /// RFC 3339 indexing timestamp
    pub const INDEXED_AT: &str = "indexed_at";

    /// Source value used for directly added knowledge.
    pub const KNOWLEDGE_SOURCE: &str = "knowledge";
}

/// A piece of content together with its embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Unique identifier within a store
    pub id: String,

    /// Text content
    pub content: String,

    /// Embedding vector
    pub embedding: Vec<f32>,

    /// Free-form metadata
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Document {
    /// Create a document without metadata.
    pub fn new(id: impl Into<String>, content: impl Into<String>, embedding: Vec<f32>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            embedding,
            metadata: BTreeMap::new(),
        }
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// The `source` metadata entry, if present.
    pub fn source(&self) -> Option<&str> {
        self.metadata.get(metadata_keys::SOURCE).map(String::as_str)
    }
}

/// A document with its similarity score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredDocument {
    /// The document
    pub document: Document,
    /// Similarity score (higher is more similar)
    pub score: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_builder() {
        let doc = Document::new("1", "hello", vec![1.0, 0.0])
            .with_metadata(metadata_keys::SOURCE, "/tmp/a.md");
        assert_eq!(doc.source(), Some("/tmp/a.md"));
        assert_eq!(doc.embedding, vec![1.0, 0.0]);
    }

    #[test]
    fn test_document_deserialize_without_metadata() {
        let doc: Document =
            serde_json::from_str(r#"{"id":"x","content":"c","embedding":[0.5]}"#).unwrap();
        assert!(doc.metadata.is_empty());
        assert_eq!(doc.source(), None);
    }
}
