//! Conversation orchestration
//!
//! Runs a query against the model with retrieved context and permissioned
//! capability calls, and bundles store, indexer, retrieval and orchestrator
//! behind the [`Assistant`] facade.

#![warn(missing_docs)]

pub mod assistant;
pub mod conversation;
pub mod error;
pub mod orchestrator;

pub use assistant::Assistant;
pub use conversation::ConversationState;
pub use error::{OrchestratorError, Result};
pub use orchestrator::{Answer, ConversationOrchestrator, StreamEvent, Termination};
pub use tokio_util::sync::CancellationToken;
