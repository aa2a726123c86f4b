//! In-memory vector store with snapshot persistence.
//!
//! Documents live in a map keyed by id behind a single `RwLock`: searches
//! share the read guard, every mutation (including save and load) takes the
//! write guard. Search is an exact cosine-similarity scan, which is plenty
//! for a personal knowledge base.

use crate::error::Result;
use cortex_core::{knowledge_document_id, parse_knowledge_document_id, Document, ScoredDocument};
use cortex_storage::{DocumentStorage, JsonFileStorage};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

#[derive(Default)]
struct StoreState {
    documents: BTreeMap<String, Document>,
    next_knowledge_id: u64,
}

impl StoreState {
    fn replace_all(&mut self, documents: Vec<Document>) {
        self.documents = documents.into_iter().map(|d| (d.id.clone(), d)).collect();
        self.next_knowledge_id = self
            .documents
            .keys()
            .filter_map(|id| parse_knowledge_document_id(id))
            .max()
            .map_or(0, |n| n + 1);
    }
}

/// Shared store of embedded documents.
///
/// Wrap it in an `Arc` and hand clones to every component that reads or
/// writes knowledge.
#[derive(Default)]
pub struct VectorStore {
    state: RwLock<StoreState>,
    persistence: Option<Arc<dyn DocumentStorage>>,
}

impl VectorStore {
    /// Create an empty store without a default storage location.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store bound to `storage` for [`save_default`](Self::save_default)
    /// and [`load_default`](Self::load_default).
    pub fn with_persistence(storage: Arc<dyn DocumentStorage>) -> Self {
        Self {
            state: RwLock::default(),
            persistence: Some(storage),
        }
    }

    /// Create an empty store bound to a JSON snapshot file at `path`.
    pub fn at_path(path: impl AsRef<Path>) -> Self {
        Self::with_persistence(Arc::new(JsonFileStorage::new(path.as_ref())))
    }

    /// Default storage location, if bound.
    pub fn storage_location(&self) -> Option<&Path> {
        self.persistence.as_ref().map(|s| s.location())
    }

    /// Insert `document`, replacing any document with the same id.
    ///
    /// Returns `true` when an existing document was replaced.
    pub async fn add_or_replace(&self, document: Document) -> bool {
        let mut state = self.state.write().await;
        if let Some(n) = parse_knowledge_document_id(&document.id) {
            state.next_knowledge_id = state.next_knowledge_id.max(n + 1);
        }
        state.documents.insert(document.id.clone(), document).is_some()
    }

    /// Store directly added knowledge under a fresh synthetic id.
    pub async fn add_knowledge(
        &self,
        content: impl Into<String>,
        embedding: Vec<f32>,
        metadata: BTreeMap<String, String>,
    ) -> String {
        let mut state = self.state.write().await;
        let mut n = state.next_knowledge_id;
        while state.documents.contains_key(&knowledge_document_id(n)) {
            n += 1;
        }
        state.next_knowledge_id = n + 1;

        let id = knowledge_document_id(n);
        let mut document = Document::new(id.clone(), content, embedding);
        document.metadata.extend(metadata);
        state.documents.insert(id.clone(), document);
        id
    }

    /// Up to `k` documents ranked by descending cosine similarity to `query`.
    ///
    /// Equal scores are ordered by id. Documents whose embedding length
    /// differs from the query score 0.0.
    pub async fn search(&self, query: &[f32], k: usize) -> Vec<ScoredDocument> {
        if k == 0 {
            return Vec::new();
        }
        let state = self.state.read().await;

        let mut scored: Vec<(f32, &Document)> = state
            .documents
            .values()
            .map(|doc| (cosine_similarity(query, &doc.embedding), doc))
            .collect();

        scored.sort_by(|a, b| compare_scores(b.0, a.0).then_with(|| a.1.id.cmp(&b.1.id)));
        scored
            .into_iter()
            .take(k)
            .map(|(score, doc)| ScoredDocument {
                document: doc.clone(),
                score,
            })
            .collect()
    }

    /// Document with the given id.
    pub async fn get(&self, id: &str) -> Option<Document> {
        self.state.read().await.documents.get(id).cloned()
    }

    /// Number of stored documents.
    pub async fn count(&self) -> usize {
        self.state.read().await.documents.len()
    }

    /// Remove every document.
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        let removed = state.documents.len();
        *state = StoreState::default();
        info!("Cleared {} documents from vector store", removed);
    }

    /// Write every document to `storage`.
    ///
    /// The write guard is held for the whole save so no mutation interleaves.
    pub async fn save_to(&self, storage: &dyn DocumentStorage) -> Result<()> {
        let state = self.state.write().await;
        let documents: Vec<Document> = state.documents.values().cloned().collect();
        storage.save_documents(&documents).await?;
        debug!(
            "Saved vector store ({} documents) to {}",
            documents.len(),
            storage.location().display()
        );
        Ok(())
    }

    /// Replace the contents of the store with the documents in `storage`.
    ///
    /// On failure the store is left empty.
    pub async fn load_from(&self, storage: &dyn DocumentStorage) -> Result<usize> {
        let mut state = self.state.write().await;
        match storage.load_documents().await {
            Ok(documents) => {
                state.replace_all(documents);
                let count = state.documents.len();
                info!(
                    "Loaded {} documents from {}",
                    count,
                    storage.location().display()
                );
                Ok(count)
            }
            Err(e) => {
                *state = StoreState::default();
                warn!(
                    "Failed to load vector store from {}: {}",
                    storage.location().display(),
                    e
                );
                Err(e.into())
            }
        }
    }

    /// Save to a JSON snapshot file at `path`.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        self.save_to(&JsonFileStorage::new(path.as_ref())).await
    }

    /// Load from a JSON snapshot file at `path`. A missing file loads zero documents.
    pub async fn load(&self, path: impl AsRef<Path>) -> Result<usize> {
        self.load_from(&JsonFileStorage::new(path.as_ref())).await
    }

    /// Save to the bound storage; a store without one has nothing to do.
    pub async fn save_default(&self) -> Result<()> {
        match &self.persistence {
            Some(storage) => self.save_to(storage.as_ref()).await,
            None => Ok(()),
        }
    }

    /// Load from the bound storage; a store without one loads nothing.
    pub async fn load_default(&self) -> Result<usize> {
        match &self.persistence {
            Some(storage) => self.load_from(storage.as_ref()).await,
            None => Ok(0),
        }
    }
}

/// Descending order with NaN treated as the lowest score.
fn compare_scores(a: f32, b: f32) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

/// Calculate cosine similarity between two vectors.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot_product / (norm_a * norm_b)
    }
}
