//! Configuration consumed by the core components.
//!
//! Loading is left to the binary; everything here is a plain serde struct
//! with defaults, so a partial TOML file is enough.

use crate::{ConfigError, Permission};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Persona prepended to every conversation
    pub system_prompt: String,
    /// Chat model settings
    pub llm: LlmConfig,
    /// Embedding model settings
    pub embedding: EmbeddingConfig,
    /// File indexing behavior
    pub indexer: IndexerConfig,
    /// Query-time retrieval
    pub retrieval: RetrievalConfig,
    /// Knowledge store location
    pub storage: StorageConfig,
    /// Tool loop bounds
    pub orchestrator: OrchestratorConfig,
    /// Capabilities granted to the model
    pub permissions: PermissionConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            llm: LlmConfig::default(),
            embedding: EmbeddingConfig::default(),
            indexer: IndexerConfig::default(),
            retrieval: RetrievalConfig::default(),
            storage: StorageConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            permissions: PermissionConfig::default(),
        }
    }
}

impl Config {
    /// Check the numeric invariants the components rely on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.indexer.validate()?;
        if self.retrieval.top_k == 0 {
            return Err(ConfigError::NotPositive("retrieval.top_k"));
        }
        if self.orchestrator.max_tool_iterations == 0 {
            return Err(ConfigError::NotPositive("orchestrator.max_tool_iterations"));
        }
        if self.llm.request_timeout_secs == 0 {
            return Err(ConfigError::NotPositive("llm.request_timeout_secs"));
        }
        if self.embedding.timeout_secs == 0 {
            return Err(ConfigError::NotPositive("embedding.timeout_secs"));
        }
        Ok(())
    }

    /// Set the system prompt.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Set the chat model identifier.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.llm.model = model.into();
        self
    }

    /// Set the knowledge store directory.
    pub fn with_storage_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage.path = path.into();
        self
    }

    /// Set the granted permission.
    pub fn with_permission(mut self, granted: Permission) -> Self {
        self.permissions.granted = granted;
        self
    }
}

fn default_system_prompt() -> String {
    "You are a helpful AI assistant specializing in programming and development tasks. \
     Use the available tools when they help answer the question."
        .to_string()
}

/// Chat model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Backend base URL
    pub base_url: String,
    /// Chat model identifier
    pub model: String,
    /// Sampling temperature
    pub temperature: f64,
    /// Context window passed to the backend, if any
    pub context_length: Option<usize>,
    /// Deadline for a single chat call
    pub request_timeout_secs: u64,
}

impl LlmConfig {
    /// Deadline for a single chat call.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "qwen3:8b".to_string(),
            temperature: 0.6,
            context_length: None,
            request_timeout_secs: 300,
        }
    }
}

/// Embedding model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Embedding model identifier
    pub model: String,
    /// Deadline for a single embedding call
    pub timeout_secs: u64,
}

impl EmbeddingConfig {
    /// Deadline for a single embedding call.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "nomic-embed-text".to_string(),
            timeout_secs: 60,
        }
    }
}

/// File indexing behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// File extensions to index (e.g. `["rs", "md"]`); empty means every text file
    pub extensions: Vec<String>,

    /// Substrings of the full path that exclude a file or directory
    pub exclude_patterns: Vec<String>,

    /// Maximum chunk length in characters
    pub chunk_size: usize,

    /// Characters shared by consecutive chunks
    pub chunk_overlap: usize,
}

impl IndexerConfig {
    /// Check `chunk_size > 0` and `chunk_overlap < chunk_size`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::NotPositive("indexer.chunk_size"));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(ConfigError::OverlapTooLarge {
                size: self.chunk_size,
                overlap: self.chunk_overlap,
            });
        }
        Ok(())
    }
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            extensions: Vec::new(),
            exclude_patterns: default_exclude_patterns(),
            chunk_size: 512,
            chunk_overlap: 50,
        }
    }
}

/// Build artifacts, version control, package managers and editor state.
pub fn default_exclude_patterns() -> Vec<String> {
    [
        ".git",
        "node_modules",
        "/target/",
        "__pycache__",
        ".venv",
        "/dist/",
        ".DS_Store",
        ".idea",
        ".vscode",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Query-time retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Number of documents injected as context
    pub top_k: usize,
    /// Results scoring below this are dropped (0.0 disables the filter)
    pub min_score: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            min_score: 0.0,
        }
    }
}

/// Knowledge store location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the persisted store
    pub path: PathBuf,
}

impl StorageConfig {
    /// File the vector store is persisted to.
    pub fn store_file(&self) -> PathBuf {
        self.path.join("vector_store.json")
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/knowledge"),
        }
    }
}

/// Tool loop bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Rounds of capability calls allowed before giving up
    pub max_tool_iterations: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_tool_iterations: 8,
        }
    }
}

/// Capabilities granted to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionConfig {
    /// Granted permission level
    pub granted: Permission,
    /// Directory relative capability paths resolve against
    pub workspace_root: PathBuf,
    /// Deadline for `run_command`
    pub command_timeout_secs: u64,
}

impl Default for PermissionConfig {
    fn default() -> Self {
        Self {
            granted: Permission::Read,
            workspace_root: PathBuf::from("."),
            command_timeout_secs: 30,
        }
    }
}
