//! In-memory backends for tests.

use crate::r#trait::{BackendError, ChatBackend, ChatRequest, ChatResponse, EmbeddingBackend, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Chat backend replaying a fixed script of responses.
///
/// Each call pops the next scripted entry; once the script is exhausted the
/// fallback response (if any) is returned forever.
#[derive(Default)]
pub struct ScriptedBackend {
    script: Mutex<VecDeque<std::result::Result<ChatResponse, String>>>,
    fallback: Option<ChatResponse>,
    delay: Option<Duration>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedBackend {
    /// Backend answering with `responses` in order.
    pub fn new(responses: impl IntoIterator<Item = ChatResponse>) -> Self {
        Self {
            script: Mutex::new(responses.into_iter().map(Ok).collect()),
            ..Default::default()
        }
    }

    /// Backend that answers every call with `response`.
    pub fn repeating(response: ChatResponse) -> Self {
        Self {
            fallback: Some(response),
            ..Default::default()
        }
    }

    /// Append a failing turn to the script.
    pub fn then_fail(self, message: impl Into<String>) -> Self {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Err(message.into()));
        self
    }

    /// Sleep before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Number of chat calls received so far.
    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        match next {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(BackendError::Unavailable(message)),
            None => self
                .fallback
                .clone()
                .ok_or_else(|| BackendError::InvalidResponse("script exhausted".into())),
        }
    }
}

/// Deterministic bag-of-words embedder.
///
/// Each lowercase alphanumeric word is hashed (FNV-1a) into one of
/// [`FakeEmbedder::DIMENSIONS`] buckets, so texts sharing words score higher
/// under cosine similarity.
#[derive(Default)]
pub struct FakeEmbedder {
    /// Inputs containing this marker fail; `Some("")` fails everything
    fail_on: Option<String>,
    calls: AtomicUsize,
}

impl FakeEmbedder {
    /// Embedding length.
    pub const DIMENSIONS: usize = 16;

    /// Working embedder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Embedder whose every call fails.
    pub fn failing() -> Self {
        Self::failing_on("")
    }

    /// Embedder failing only for inputs that contain `marker`.
    pub fn failing_on(marker: impl Into<String>) -> Self {
        Self {
            fail_on: Some(marker.into()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of embedding calls received so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Embedding of `input`, without counting the call.
    pub fn vector_for(input: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; Self::DIMENSIONS];
        for word in input
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let bucket = fnv1a(&word.to_lowercase()) as usize % Self::DIMENSIONS;
            vector[bucket] += 1.0;
        }
        if vector.iter().all(|v| *v == 0.0) {
            vector[0] = 1.0;
        }
        vector
    }
}

fn fnv1a(s: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in s.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[async_trait]
impl EmbeddingBackend for FakeEmbedder {
    async fn embed(&self, _model: &str, input: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self
            .fail_on
            .as_deref()
            .is_some_and(|marker| input.contains(marker))
        {
            return Err(BackendError::Unavailable("embedding backend offline".into()));
        }
        Ok(Self::vector_for(input))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_core::Message;

    fn request() -> ChatRequest {
        ChatRequest {
            model: "m".to_string(),
            messages: vec![Message::user("q")],
            capabilities: Vec::new(),
            options: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_scripted_backend_order_and_exhaustion() {
        let backend = ScriptedBackend::new([ChatResponse::answer("one")]).then_fail("down");

        assert_eq!(backend.chat(&request()).await.unwrap().content, "one");
        assert!(matches!(
            backend.chat(&request()).await,
            Err(BackendError::Unavailable(_))
        ));
        assert!(matches!(
            backend.chat(&request()).await,
            Err(BackendError::InvalidResponse(_))
        ));
        assert_eq!(backend.call_count(), 3);
    }

    #[tokio::test]
    async fn test_fake_embedder_is_deterministic() {
        let embedder = FakeEmbedder::new();
        let a = embedder.embed("m", "Rust ownership").await.unwrap();
        let b = embedder.embed("m", "rust OWNERSHIP").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), FakeEmbedder::DIMENSIONS);
        assert_eq!(embedder.call_count(), 2);

        assert!(FakeEmbedder::failing().embed("m", "x").await.is_err());
        let selective = FakeEmbedder::failing_on("poison");
        assert!(selective.embed("m", "poison pill").await.is_err());
        assert!(selective.embed("m", "plain text").await.is_ok());
    }
}
