//! Argument validation against a capability's JSON Schema.

use crate::r#trait::{Result, ToolError};
use jsonschema::{Draft, JSONSchema};
use serde_json::Value;

/// Compiled parameter schema.
pub struct ArgumentValidator {
    compiled: JSONSchema,
}

impl ArgumentValidator {
    /// Compile `schema` (draft 7).
    pub fn compile(schema: &Value) -> std::result::Result<Self, String> {
        let compiled = JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(schema)
            .map_err(|e| format!("failed to compile parameter schema: {e}"))?;
        Ok(Self { compiled })
    }

    /// Check `arguments`, listing every violation on failure.
    pub fn validate(&self, arguments: &Value) -> Result<()> {
        if let Err(errors) = self.compiled.validate(arguments) {
            let messages: Vec<String> = errors
                .map(|e| {
                    let path = e.instance_path.to_string();
                    if path.is_empty() {
                        e.to_string()
                    } else {
                        format!("{e} at {path}")
                    }
                })
                .collect();
            return Err(ToolError::InvalidInput(messages.join("; ")));
        }
        Ok(())
    }
}
