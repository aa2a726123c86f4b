//! Capability abstraction.

use async_trait::async_trait;
use cortex_core::{CapabilitySpec, ErrorKind, Permission};
use serde_json::Value;

/// Error type for capability execution.
pub type Result<T> = std::result::Result<T, ToolError>;

/// Why a capability call did not produce a result.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolError {
    /// Arguments do not match the capability's schema
    #[error("invalid arguments: {0}")]
    InvalidInput(String),

    /// The capability ran and failed
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// The capability refused the operation
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// No visible capability has this name
    #[error("capability not found: {0}")]
    NotFound(String),
}

impl ToolError {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ToolError::InvalidInput(_) => ErrorKind::InvalidInput,
            ToolError::ExecutionFailed(_) => ErrorKind::ExecutionFailed,
            ToolError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            ToolError::NotFound(_) => ErrorKind::NotFound,
        }
    }
}

/// A named, permission-gated unit of functionality the model may invoke.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Unique name.
    fn name(&self) -> &str;

    /// Description shown to the model.
    fn description(&self) -> &str;

    /// JSON Schema of the arguments object.
    fn parameter_schema(&self) -> Value;

    /// Minimum permission needed to see and run this capability.
    fn required_permission(&self) -> Permission;

    /// Run with already validated `arguments`.
    async fn execute(&self, arguments: &Value) -> Result<String>;

    /// Description for model discovery.
    fn spec(&self) -> CapabilitySpec {
        CapabilitySpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameter_schema: self.parameter_schema(),
            required_permission: self.required_permission(),
        }
    }
}
