//! Capability registry.
//!
//! Capabilities are keyed by name. What a caller can see and what it can run
//! are both filtered by its granted permission, so a model that invents a
//! call to a hidden capability gets the same answer as for an unknown one.

use crate::r#trait::{Capability, Result, ToolError};
use crate::schema::ArgumentValidator;
use cortex_core::{CapabilitySpec, Permission};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Aborts the wrapped capability task once the caller stops waiting on it.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

struct Entry {
    capability: Arc<dyn Capability>,
    validator: std::result::Result<Arc<ArgumentValidator>, String>,
}

/// Name-keyed set of capabilities with a granted permission.
pub struct CapabilityRegistry {
    granted: Permission,
    entries: HashMap<String, Entry>,
}

impl CapabilityRegistry {
    /// Empty registry executing under `granted`.
    pub fn new(granted: Permission) -> Self {
        Self {
            granted,
            entries: HashMap::new(),
        }
    }

    /// Permission used by [`execute`](Self::execute) and [`specs`](Self::specs).
    pub fn granted(&self) -> Permission {
        self.granted
    }

    /// Add `capability`, replacing any capability of the same name.
    pub fn register(&mut self, capability: Arc<dyn Capability>) {
        let name = capability.name().to_string();
        let validator = ArgumentValidator::compile(&capability.parameter_schema()).map(Arc::new);
        if let Err(e) = &validator {
            warn!("Capability {} has an invalid parameter schema: {}", name, e);
        }

        let previous = self.entries.insert(
            name.clone(),
            Entry {
                capability,
                validator,
            },
        );
        if previous.is_some() {
            warn!("Capability {} registered twice; keeping the latest", name);
        } else {
            debug!("Registered capability {}", name);
        }
    }

    /// Number of registered capabilities, visible or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Specs of the capabilities `granted` may use, sorted by name.
    pub fn list_available(&self, granted: Permission) -> Vec<CapabilitySpec> {
        let mut specs: Vec<CapabilitySpec> = self
            .entries
            .values()
            .filter(|e| granted.allows(e.capability.required_permission()))
            .map(|e| e.capability.spec())
            .collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    /// Specs visible under the registry's own grant.
    pub fn specs(&self) -> Vec<CapabilitySpec> {
        self.list_available(self.granted)
    }

    /// Run `name` under the registry's own grant.
    pub async fn execute(&self, name: &str, arguments: &Value) -> Result<String> {
        self.execute_as(self.granted, name, arguments).await
    }

    /// Run `name` under `granted`.
    ///
    /// Unknown capabilities and capabilities hidden by the grant both fail
    /// with [`ToolError::NotFound`]. Arguments are validated before the
    /// capability runs; a panic inside it becomes
    /// [`ToolError::ExecutionFailed`].
    pub async fn execute_as(
        &self,
        granted: Permission,
        name: &str,
        arguments: &Value,
    ) -> Result<String> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;

        let required = entry.capability.required_permission();
        if !granted.allows(required) {
            warn!(
                "Refused call to {} (requires {}, granted {})",
                name, required, granted
            );
            return Err(ToolError::NotFound(name.to_string()));
        }

        match &entry.validator {
            Ok(validator) => validator.validate(arguments)?,
            Err(e) => return Err(ToolError::InvalidInput(e.clone())),
        }

        debug!("Executing capability {}", name);
        let capability = Arc::clone(&entry.capability);
        let arguments = arguments.clone();
        let mut task = AbortOnDrop(tokio::spawn(async move {
            capability.execute(&arguments).await
        }));

        match (&mut task.0).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => {
                warn!("Capability {} panicked", name);
                Err(ToolError::ExecutionFailed(format!("capability {name} panicked")))
            }
            Err(e) => Err(ToolError::ExecutionFailed(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    struct Echo {
        name: &'static str,
        permission: Permission,
    }

    #[async_trait]
    impl Capability for Echo {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "Echo the text argument"
        }

        fn parameter_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": {"text": {"type": "string"}},
                "required": ["text"]
            })
        }

        fn required_permission(&self) -> Permission {
            self.permission
        }

        async fn execute(&self, arguments: &Value) -> Result<String> {
            Ok(format!("{}: {}", self.name, arguments["text"].as_str().unwrap_or_default()))
        }
    }

    struct Panicky;

    #[async_trait]
    impl Capability for Panicky {
        fn name(&self) -> &str {
            "panicky"
        }

        fn description(&self) -> &str {
            "Always panics"
        }

        fn parameter_schema(&self) -> Value {
            json!({"type": "object"})
        }

        fn required_permission(&self) -> Permission {
            Permission::Read
        }

        async fn execute(&self, _arguments: &Value) -> Result<String> {
            panic!("boom");
        }
    }

    fn registry(granted: Permission) -> CapabilityRegistry {
        let mut registry = CapabilityRegistry::new(granted);
        for (name, permission) in [
            ("reader", Permission::Read),
            ("writer", Permission::Write),
            ("admin", Permission::All),
        ] {
            registry.register(Arc::new(Echo { name, permission }));
        }
        registry
    }

    #[test]
    fn test_list_available_filters_by_permission() {
        let registry = registry(Permission::All);
        let names = |granted| -> Vec<String> {
            registry
                .list_available(granted)
                .into_iter()
                .map(|s| s.name)
                .collect()
        };

        assert!(names(Permission::None).is_empty());
        assert_eq!(names(Permission::Read), vec!["reader"]);
        assert_eq!(names(Permission::Write), vec!["reader", "writer"]);
        assert_eq!(names(Permission::All), vec!["admin", "reader", "writer"]);
    }

    #[tokio::test]
    async fn test_execute_visible_capability() {
        let registry = registry(Permission::Read);
        let out = registry.execute("reader", &json!({"text": "hi"})).await.unwrap();
        assert_eq!(out, "reader: hi");
    }

    #[tokio::test]
    async fn test_hidden_and_unknown_are_not_found() {
        let registry = registry(Permission::Read);

        let err = registry.execute("writer", &json!({"text": "x"})).await.unwrap_err();
        assert_eq!(err, ToolError::NotFound("writer".to_string()));

        let err = registry
            .execute("delete_everything", &json!({}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"));

        let out = registry
            .execute_as(Permission::Write, "writer", &json!({"text": "x"}))
            .await
            .unwrap();
        assert_eq!(out, "writer: x");
    }

    #[tokio::test]
    async fn test_arguments_validated_before_execution() {
        let registry = registry(Permission::Read);
        let err = registry.execute("reader", &json!({"text": 5})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_duplicate_registration_last_wins() {
        let mut registry = registry(Permission::All);
        registry.register(Arc::new(Echo {
            name: "reader",
            permission: Permission::All,
        }));
        assert_eq!(registry.len(), 3);
        assert!(registry
            .list_available(Permission::Read)
            .iter()
            .all(|s| s.name != "reader"));
    }

    #[tokio::test]
    async fn test_panic_becomes_execution_failure() {
        let mut registry = CapabilityRegistry::new(Permission::Read);
        registry.register(Arc::new(Panicky));
        let err = registry.execute("panicky", &json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed(_)));
    }

    struct Slow {
        finished: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Capability for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        fn description(&self) -> &str {
            "Sleeps, then records that it finished"
        }

        fn parameter_schema(&self) -> Value {
            json!({"type": "object"})
        }

        fn required_permission(&self) -> Permission {
            Permission::Read
        }

        async fn execute(&self, _arguments: &Value) -> Result<String> {
            tokio::time::sleep(Duration::from_millis(300)).await;
            self.finished.store(true, Ordering::SeqCst);
            Ok("done".to_string())
        }
    }

    #[tokio::test]
    async fn test_abandoned_call_stops_capability() {
        let finished = Arc::new(AtomicBool::new(false));
        let mut registry = CapabilityRegistry::new(Permission::Read);
        registry.register(Arc::new(Slow {
            finished: finished.clone(),
        }));

        let result =
            tokio::time::timeout(Duration::from_millis(50), registry.execute("slow", &json!({})))
                .await;
        assert!(result.is_err());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_specs_use_registry_grant() {
        let registry = registry(Permission::Write);
        let specs = registry.specs();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].parameter_schema["required"][0], "text");
    }
}
