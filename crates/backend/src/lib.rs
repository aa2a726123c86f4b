//! Model backend contract.
//!
//! The language model is an external service. This crate defines what the
//! rest of Cortex expects from it (chat with capability calls, streaming
//! chat, embeddings) and ships an Ollama HTTP binding.

#![warn(missing_docs)]

pub mod r#trait;
pub mod ollama;

#[cfg(any(test, feature = "test-helpers"))]
pub mod testing;

pub use r#trait::{
    BackendError, ChatBackend, ChatChunk, ChatRequest, ChatResponse, ChatStream,
    EmbeddingBackend, Result, SamplingOptions,
};
pub use ollama::OllamaClient;
