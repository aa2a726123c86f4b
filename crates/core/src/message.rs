//! Conversation messages.

use crate::CapabilityCall;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Persona and instructions
    System,
    /// The human asking
    User,
    /// The model
    Assistant,
    /// Output of a capability call
    Tool,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// One entry of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Author
    pub role: Role,

    /// Text content
    pub content: String,

    /// Capability calls requested by an assistant message
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requested_calls: Vec<CapabilityCall>,
}

impl Message {
    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            requested_calls: Vec::new(),
        }
    }

    /// System message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content)
    }

    /// User message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    /// Assistant message, possibly requesting calls.
    pub fn assistant(content: impl Into<String>, requested_calls: Vec<CapabilityCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            requested_calls,
        }
    }

    /// Tool output message.
    pub fn tool(content: impl Into<String>) -> Self {
        Self::with_role(Role::Tool, content)
    }
}
