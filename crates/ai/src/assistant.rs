//! Assistant facade.
//!
//! Wires one shared [`VectorStore`] into the indexer, the retrieval service
//! and the orchestrator, so callers deal with a single handle.

use crate::error::Result;
use crate::orchestrator::{Answer, ConversationOrchestrator, StreamEvent};
use cortex_backend::{ChatBackend, EmbeddingBackend};
use cortex_core::{CapabilitySpec, Config};
use cortex_knowledge::{KnowledgeIndexer, RetrievalService, VectorStore};
use cortex_tools::{register_builtins, CapabilityRegistry};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Knowledge-backed, tool-using assistant.
pub struct Assistant {
    config: Config,
    store: Arc<VectorStore>,
    indexer: KnowledgeIndexer,
    retrieval: Arc<RetrievalService>,
    orchestrator: Arc<ConversationOrchestrator>,
}

impl Assistant {
    /// Build an assistant around an already populated `registry`.
    pub fn new(
        config: Config,
        chat: Arc<dyn ChatBackend>,
        embedder: Arc<dyn EmbeddingBackend>,
        registry: CapabilityRegistry,
    ) -> Result<Self> {
        Self::build(config, chat, embedder, |_| registry)
    }

    /// Build an assistant offering the built-in capabilities, gated by the
    /// configured grant.
    pub fn with_default_capabilities(
        config: Config,
        chat: Arc<dyn ChatBackend>,
        embedder: Arc<dyn EmbeddingBackend>,
    ) -> Result<Self> {
        let permissions = config.permissions.clone();
        Self::build(config, chat, embedder, move |retrieval| {
            let mut registry = CapabilityRegistry::new(permissions.granted);
            register_builtins(&mut registry, &permissions, Arc::clone(retrieval));
            registry
        })
    }

    fn build(
        config: Config,
        chat: Arc<dyn ChatBackend>,
        embedder: Arc<dyn EmbeddingBackend>,
        registry: impl FnOnce(&Arc<RetrievalService>) -> CapabilityRegistry,
    ) -> Result<Self> {
        config.validate()?;

        let store = Arc::new(VectorStore::at_path(config.storage.store_file()));
        let indexer = KnowledgeIndexer::new(store.clone(), embedder.clone(), &config)?;
        let retrieval = Arc::new(RetrievalService::new(store.clone(), embedder, &config));
        let registry = Arc::new(registry(&retrieval));
        let orchestrator = Arc::new(ConversationOrchestrator::new(
            chat,
            registry,
            Some(retrieval.clone()),
            &config,
        )?);

        Ok(Self {
            config,
            store,
            indexer,
            retrieval,
            orchestrator,
        })
    }

    /// Configuration in use.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shared document store.
    pub fn store(&self) -> &Arc<VectorStore> {
        &self.store
    }

    /// Retrieval service.
    pub fn retrieval(&self) -> &Arc<RetrievalService> {
        &self.retrieval
    }

    /// Load the persisted knowledge store, if any.
    pub async fn load_knowledge(&self) -> Result<usize> {
        let count = self.store.load_default().await?;
        info!("Knowledge store ready ({} documents)", count);
        Ok(count)
    }

    /// Answer `query`.
    pub async fn ask(&self, query: &str) -> Result<Answer> {
        self.orchestrator.ask(query).await
    }

    /// Answer `query` until `cancel` fires.
    pub async fn ask_with_cancel(&self, query: &str, cancel: CancellationToken) -> Result<Answer> {
        self.orchestrator.ask_with_cancel(query, cancel).await
    }

    /// Answer `query` in the background, streaming progress.
    pub fn stream(
        &self,
        query: impl Into<String>,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<Result<StreamEvent>> {
        self.orchestrator.stream(query, cancel)
    }

    /// Index one file.
    pub async fn index_file(&self, path: impl AsRef<Path>) -> Result<usize> {
        Ok(self.indexer.index_file(path).await?)
    }

    /// Index one directory tree.
    pub async fn index_directory(&self, path: impl AsRef<Path>) -> Result<usize> {
        Ok(self.indexer.index_directory(path).await?)
    }

    /// Index several directory trees.
    pub async fn index_directories<P: AsRef<Path>>(&self, paths: &[P]) -> Result<usize> {
        Ok(self.indexer.index_directories(paths).await?)
    }

    /// Add a piece of knowledge directly. Returns its id.
    pub async fn add_knowledge(&self, content: &str) -> Result<String> {
        Ok(self.indexer.add_knowledge(content, BTreeMap::new()).await?)
    }

    /// Number of stored documents.
    pub async fn knowledge_count(&self) -> usize {
        self.store.count().await
    }

    /// Remove every document and persist the empty store.
    pub async fn clear_knowledge(&self) -> Result<()> {
        self.store.clear().await;
        Ok(self.store.save_default().await?)
    }

    /// Persist the store.
    pub async fn save_knowledge(&self) -> Result<()> {
        Ok(self.indexer.save().await?)
    }

    /// Capabilities offered to the model under the configured grant.
    pub fn available_capabilities(&self) -> Vec<CapabilitySpec> {
        self.orchestrator.registry().specs()
    }
}
