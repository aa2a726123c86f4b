//! Capability descriptions and invocation requests.

use crate::Permission;
use serde::{Deserialize, Serialize};

/// Capability schema for model discovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilitySpec {
    /// Unique name
    pub name: String,

    /// Description shown to the model
    pub description: String,

    /// JSON Schema of the arguments object
    pub parameter_schema: serde_json::Value,

    /// Minimum permission needed to see and run the capability
    pub required_permission: Permission,
}

/// A capability invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityCall {
    /// Capability name
    pub name: String,

    /// Arguments object
    #[serde(default)]
    pub arguments: serde_json::Value,
}

impl CapabilityCall {
    /// Create a call.
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}
