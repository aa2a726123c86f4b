//! Query-time retrieval.

use crate::error::{KnowledgeError, Result};
use crate::vector::VectorStore;
use cortex_backend::{BackendError, EmbeddingBackend};
use cortex_core::{Config, ScoredDocument};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Top-k similarity search over the shared store, formatted for prompts.
pub struct RetrievalService {
    store: Arc<VectorStore>,
    embedder: Arc<dyn EmbeddingBackend>,
    model: String,
    top_k: usize,
    min_score: f32,
    embed_timeout: Duration,
}

impl RetrievalService {
    /// Create a retrieval service reading from `store`.
    pub fn new(store: Arc<VectorStore>, embedder: Arc<dyn EmbeddingBackend>, config: &Config) -> Self {
        Self {
            store,
            embedder,
            model: config.embedding.model.clone(),
            top_k: config.retrieval.top_k,
            min_score: config.retrieval.min_score,
            embed_timeout: config.embedding.timeout(),
        }
    }

    /// Number of documents injected as context.
    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Up to `k` documents most similar to `query`.
    ///
    /// Unlike [`retrieve_context`](Self::retrieve_context) this reports
    /// embedding failures.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<ScoredDocument>> {
        if self.store.count().await == 0 {
            return Ok(Vec::new());
        }

        let embedding =
            match tokio::time::timeout(self.embed_timeout, self.embedder.embed(&self.model, query))
                .await
            {
                Ok(Ok(embedding)) => embedding,
                Ok(Err(e)) => return Err(KnowledgeError::Retrieval(e.to_string())),
                Err(_) => {
                    return Err(KnowledgeError::Retrieval(
                        BackendError::Timeout(self.embed_timeout).to_string(),
                    ))
                }
            };

        let mut results = self.store.search(&embedding, k).await;
        if self.min_score > 0.0 {
            results.retain(|r| r.score >= self.min_score);
        }
        debug!("Retrieved {} documents for query ({} chars)", results.len(), query.len());
        Ok(results)
    }

    /// Context block for `query`, or an empty string when nothing relevant
    /// is stored or retrieval fails.
    pub async fn retrieve_context(&self, query: &str) -> String {
        match self.search(query, self.top_k).await {
            Ok(results) => format_context(&results),
            Err(e) => {
                warn!("Retrieval failed, continuing without context: {}", e);
                String::new()
            }
        }
    }
}

/// Format scored documents as a numbered context block tagged with sources.
pub fn format_context(results: &[ScoredDocument]) -> String {
    if results.is_empty() {
        return String::new();
    }

    let mut context = String::from("Relevant context from the knowledge base:\n");
    for (i, result) in results.iter().enumerate() {
        let source = result.document.source().unwrap_or("unknown");
        let _ = write!(
            context,
            "\n[{}] source: {} (score {:.3})\n{}\n",
            i + 1,
            source,
            result.score,
            result.document.content.trim_end()
        );
    }
    context
}
