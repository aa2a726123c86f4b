//! Knowledge store (retrieval-augmented context)
//!
//! Chunking, embedding and indexing of files, the shared vector store with
//! snapshot persistence, and query-time retrieval.

#![warn(missing_docs)]

pub mod chunk;
pub mod error;
pub mod indexer;
pub mod retrieval;
pub mod vector;

pub use chunk::Chunker;
pub use error::{KnowledgeError, Result};
pub use indexer::KnowledgeIndexer;
pub use retrieval::{format_context, RetrievalService};
pub use vector::VectorStore;
