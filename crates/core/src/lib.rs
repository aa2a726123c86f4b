//! Cortex core data models.
//!
//! This crate defines the data structures shared by the knowledge store,
//! the capability registry and the conversation orchestrator.

#![warn(missing_docs)]

// Core identities
mod id;

// Knowledge
mod document;

// Capabilities and conversations
mod permission;
mod capability;
mod message;

// Configuration and errors
pub mod config;
mod error;

// Re-exports
pub use id::*;

pub use document::{Document, ScoredDocument, metadata_keys};
pub use permission::{Permission, ParsePermissionError};
pub use capability::{CapabilityCall, CapabilitySpec};
pub use message::{Message, Role};
pub use config::{
    Config, EmbeddingConfig, IndexerConfig, LlmConfig, OrchestratorConfig, PermissionConfig,
    RetrievalConfig, StorageConfig,
};
pub use error::{ConfigError, ErrorKind};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
