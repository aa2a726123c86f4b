//! Backend abstraction.

use async_trait::async_trait;
use cortex_core::{CapabilityCall, CapabilitySpec, ErrorKind, Message};
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Error type for backend calls.
pub type Result<T> = std::result::Result<T, BackendError>;

/// Errors a backend call can end with.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Transport-level failure
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend answered with an error status
    #[error("backend error (status {status}): {body}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Response body
        body: String,
    },

    /// The backend answered with something we cannot interpret
    #[error("invalid backend response: {0}")]
    InvalidResponse(String),

    /// The backend could not be reached or refused the call
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The call did not finish before its deadline
    #[error("backend call timed out after {0:?}")]
    Timeout(Duration),
}

impl BackendError {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            BackendError::Timeout(_) => ErrorKind::Timeout,
            _ => ErrorKind::BackendUnavailable,
        }
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(e: serde_json::Error) -> Self {
        BackendError::InvalidResponse(e.to_string())
    }
}

/// Sampling options forwarded to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingOptions {
    /// Temperature
    pub temperature: f64,
    /// Context window, if the backend should override its default
    pub context_length: Option<usize>,
}

impl Default for SamplingOptions {
    fn default() -> Self {
        Self {
            temperature: 0.6,
            context_length: None,
        }
    }
}

/// A chat completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Chat model identifier
    pub model: String,
    /// Full conversation so far
    pub messages: Vec<Message>,
    /// Capabilities the model may call
    pub capabilities: Vec<CapabilitySpec>,
    /// Sampling options
    pub options: SamplingOptions,
}

/// A complete assistant turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Assistant text
    pub content: String,
    /// Requested capability calls, in order
    pub calls: Vec<CapabilityCall>,
}

impl ChatResponse {
    /// A final answer without calls.
    pub fn answer(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            calls: Vec::new(),
        }
    }

    /// A turn requesting `calls`.
    pub fn with_calls(content: impl Into<String>, calls: Vec<CapabilityCall>) -> Self {
        Self {
            content: content.into(),
            calls,
        }
    }
}

/// One fragment of a streamed assistant turn.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatChunk {
    /// Text fragment
    pub content: String,
    /// Capability calls carried by this fragment
    pub calls: Vec<CapabilityCall>,
    /// Whether this is the last fragment
    pub done: bool,
}

/// Finite stream of fragments. Dropping it closes the underlying connection.
pub type ChatStream = BoxStream<'static, Result<ChatChunk>>;

/// Chat completion backend.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Run one chat completion.
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse>;

    /// Run one chat completion, delivering text as it is produced.
    ///
    /// Backends without native streaming deliver the whole turn as a single
    /// fragment.
    async fn chat_stream(&self, request: &ChatRequest) -> Result<ChatStream> {
        let response = self.chat(request).await?;
        let chunk = ChatChunk {
            content: response.content,
            calls: response.calls,
            done: true,
        };
        Ok(stream::once(async move { Ok(chunk) }).boxed())
    }
}

/// Embedding backend.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Embed `input` with `model`.
    async fn embed(&self, model: &str, input: &str) -> Result<Vec<f32>>;
}
