//! Capability Integration
//!
//! Permission-gated capabilities the model may call, the registry that
//! exposes and dispatches them, and the built-in file, knowledge and command
//! capabilities.

#![warn(missing_docs)]

pub mod r#trait;
pub mod schema;
pub mod registry;
pub mod builtin;

pub use r#trait::{Capability, Result, ToolError};
pub use registry::CapabilityRegistry;
pub use builtin::{
    register_builtins, ListDirectoryTool, ReadFileTool, RunCommandTool, SearchKnowledgeTool,
    Workspace, WriteFileTool,
};
