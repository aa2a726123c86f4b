//! File and directory indexing.
//!
//! Files are split into overlapping chunks, each chunk is embedded, and the
//! resulting documents are written into the shared [`VectorStore`] under ids
//! derived from `(canonical path, chunk index)`. Re-indexing a file therefore
//! replaces its chunks instead of duplicating them.

use crate::chunk::Chunker;
use crate::error::{KnowledgeError, Result};
use crate::vector::VectorStore;
use cortex_backend::{BackendError, EmbeddingBackend};
use cortex_core::{chunk_document_id, content_hash, metadata_keys, Config, Document};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Walks files, chunks and embeds them, and keeps the store saved.
pub struct KnowledgeIndexer {
    /// Shared document store
    store: Arc<VectorStore>,

    /// Embedding backend
    embedder: Arc<dyn EmbeddingBackend>,

    /// Embedding model identifier
    model: String,

    /// Chunking parameters
    chunker: Chunker,

    /// Lowercase extensions without the dot; empty means every text file
    extensions: Vec<String>,

    /// Path substrings that exclude an entry
    exclude_patterns: Vec<String>,

    /// Deadline for one embedding call
    embed_timeout: Duration,
}

impl KnowledgeIndexer {
    /// Create an indexer writing into `store`.
    ///
    /// Fails with an invalid-input error when the chunk parameters are
    /// inconsistent.
    pub fn new(
        store: Arc<VectorStore>,
        embedder: Arc<dyn EmbeddingBackend>,
        config: &Config,
    ) -> Result<Self> {
        let chunker = Chunker::new(config.indexer.chunk_size, config.indexer.chunk_overlap)?;
        let extensions = config
            .indexer
            .extensions
            .iter()
            .map(|e| e.trim_start_matches('.').to_lowercase())
            .filter(|e| !e.is_empty())
            .collect();

        Ok(Self {
            store,
            embedder,
            model: config.embedding.model.clone(),
            chunker,
            extensions,
            exclude_patterns: config.indexer.exclude_patterns.clone(),
            embed_timeout: config.embedding.timeout(),
        })
    }

    /// The store this indexer writes into.
    pub fn store(&self) -> &Arc<VectorStore> {
        &self.store
    }

    /// Index one file and save the store. Returns the number of chunks written.
    ///
    /// Files whose extension is not allowed are skipped and report zero.
    pub async fn index_file(&self, path: impl AsRef<Path>) -> Result<usize> {
        let chunks = self.index_file_unsaved(path.as_ref()).await?;
        if chunks > 0 {
            self.store.save_default().await?;
        }
        Ok(chunks)
    }

    /// Index every eligible file below `root` and save the store.
    /// Returns the number of files that produced chunks.
    ///
    /// Unreadable files are logged and skipped; a failing walk aborts.
    pub async fn index_directory(&self, root: impl AsRef<Path>) -> Result<usize> {
        let files = self.index_directory_unsaved(root.as_ref()).await?;
        self.store.save_default().await?;
        Ok(files)
    }

    /// Index several directories in order and save the store once.
    ///
    /// A failing directory does not stop the others. The first error is
    /// returned only when every directory failed.
    pub async fn index_directories<P: AsRef<Path>>(&self, roots: &[P]) -> Result<usize> {
        let mut total = 0;
        let mut succeeded = 0;
        let mut first_error = None;

        for root in roots {
            let root = root.as_ref();
            match self.index_directory_unsaved(root).await {
                Ok(files) => {
                    total += files;
                    succeeded += 1;
                }
                Err(e) => {
                    warn!("Failed to index directory {}: {}", root.display(), e);
                    first_error.get_or_insert(e);
                }
            }
        }

        if succeeded == 0 {
            if let Some(e) = first_error {
                return Err(e);
            }
        }

        self.store.save_default().await?;
        info!("Indexed {} files across {} directories", total, roots.len());
        Ok(total)
    }

    /// Embed and store a piece of knowledge that has no source file, then save.
    pub async fn add_knowledge(
        &self,
        content: &str,
        metadata: BTreeMap<String, String>,
    ) -> Result<String> {
        let embedding = self.embed(content).await?;

        let mut metadata = metadata;
        metadata
            .entry(metadata_keys::SOURCE.to_string())
            .or_insert_with(|| metadata_keys::KNOWLEDGE_SOURCE.to_string());
        metadata.insert(metadata_keys::CONTENT_HASH.to_string(), content_hash(content));
        metadata.insert(
            metadata_keys::INDEXED_AT.to_string(),
            chrono::Utc::now().to_rfc3339(),
        );

        let id = self.store.add_knowledge(content, embedding, metadata).await;
        self.store.save_default().await?;
        debug!("Added knowledge {}", id);
        Ok(id)
    }

    /// Save the store to its bound location.
    pub async fn save(&self) -> Result<()> {
        self.store.save_default().await
    }

    fn extension_allowed(&self, path: &Path) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(e)))
            .unwrap_or(false)
    }

    fn is_excluded(&self, path: &Path, is_dir: bool) -> bool {
        let mut full = path.to_string_lossy().into_owned();
        if is_dir {
            full.push('/');
        }
        self.exclude_patterns.iter().any(|p| full.contains(p.as_str()))
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        match tokio::time::timeout(self.embed_timeout, self.embedder.embed(&self.model, text)).await
        {
            Ok(result) => Ok(result?),
            Err(_) => Err(BackendError::Timeout(self.embed_timeout).into()),
        }
    }

    async fn index_file_unsaved(&self, path: &Path) -> Result<usize> {
        if !self.extension_allowed(path) {
            debug!("Skipping {} (extension not allowed)", path.display());
            return Ok(0);
        }

        let canonical = tokio::fs::canonicalize(path)
            .await
            .map_err(|source| KnowledgeError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        let bytes = tokio::fs::read(&canonical)
            .await
            .map_err(|source| KnowledgeError::Read {
                path: canonical.clone(),
                source,
            })?;

        let content = match String::from_utf8(bytes) {
            Ok(content) => content,
            Err(_) if self.extensions.is_empty() => {
                debug!("Skipping {} (not UTF-8 text)", canonical.display());
                return Ok(0);
            }
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        };

        if content.trim().is_empty() {
            debug!("Skipping {} (empty)", canonical.display());
            return Ok(0);
        }

        let chunks = self.chunker.split(&content);

        // Embed everything first so a failure leaves the stored chunks untouched.
        let mut embeddings = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            embeddings.push(self.embed(chunk).await?);
        }

        self.warn_if_shrunk(&canonical, chunks.len()).await;

        let source = canonical.to_string_lossy().into_owned();
        let indexed_at = chrono::Utc::now().to_rfc3339();
        let count = chunks.len();
        let chunk_count = count.to_string();
        for (index, (chunk, embedding)) in chunks.into_iter().zip(embeddings).enumerate() {
            let hash = content_hash(&chunk);
            let document = Document::new(chunk_document_id(&canonical, index), chunk, embedding)
                .with_metadata(metadata_keys::SOURCE, source.as_str())
                .with_metadata(metadata_keys::CHUNK_INDEX, index.to_string())
                .with_metadata(metadata_keys::CHUNK_COUNT, chunk_count.as_str())
                .with_metadata(metadata_keys::CONTENT_HASH, hash)
                .with_metadata(metadata_keys::INDEXED_AT, indexed_at.as_str());
            self.store.add_or_replace(document).await;
        }

        info!("Indexed {} ({} chunks)", canonical.display(), count);
        Ok(count)
    }

    /// Surplus chunks of a shrunk file are not removed; say so.
    async fn warn_if_shrunk(&self, canonical: &Path, new_count: usize) {
        let Some(previous) = self.store.get(&chunk_document_id(canonical, 0)).await else {
            return;
        };
        let old_count = previous
            .metadata
            .get(metadata_keys::CHUNK_COUNT)
            .and_then(|c| c.parse::<usize>().ok())
            .unwrap_or(0);
        if old_count > new_count {
            warn!(
                "{} shrank from {} to {} chunks; {} stale chunks remain until the store is cleared",
                canonical.display(),
                old_count,
                new_count,
                old_count - new_count
            );
        }
    }

    async fn index_directory_unsaved(&self, root: &Path) -> Result<usize> {
        let metadata = tokio::fs::metadata(root)
            .await
            .map_err(|e| KnowledgeError::Traversal {
                path: root.to_path_buf(),
                message: e.to_string(),
            })?;
        if !metadata.is_dir() {
            return Err(KnowledgeError::Traversal {
                path: root.to_path_buf(),
                message: "not a directory".to_string(),
            });
        }

        let files = self.collect_files(root)?;
        debug!("Found {} candidate files under {}", files.len(), root.display());

        let mut indexed = 0;
        for file in files {
            match self.index_file_unsaved(&file).await {
                Ok(0) => {}
                Ok(_) => indexed += 1,
                Err(e) => warn!("Skipping {}: {}", file.display(), e),
            }
        }

        info!("Indexed {} files under {}", indexed, root.display());
        Ok(indexed)
    }

    fn collect_files(&self, root: &Path) -> Result<Vec<PathBuf>> {
        let walker = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0 || !self.is_excluded(entry.path(), entry.file_type().is_dir())
            });

        let mut files = Vec::new();
        for entry in walker {
            let entry = entry.map_err(|e| KnowledgeError::Traversal {
                path: root.to_path_buf(),
                message: e.to_string(),
            })?;
            if entry.file_type().is_file() && self.extension_allowed(entry.path()) {
                files.push(entry.into_path());
            }
        }
        Ok(files)
    }
}
