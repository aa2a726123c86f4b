//! Built-in capabilities (files, knowledge search, commands).
//!
//! Relative paths resolve against the workspace root and no path may escape
//! it.

use crate::r#trait::{Capability, Result, ToolError};
use crate::registry::CapabilityRegistry;
use async_trait::async_trait;
use cortex_core::{Permission, PermissionConfig};
use cortex_knowledge::{format_context, RetrievalService};
use serde_json::{json, Value};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Entries listed before `list_directory` stops.
const MAX_LIST_ENTRIES: usize = 1000;

/// Directory the file capabilities are confined to.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Workspace rooted at `root` (made absolute against the current
    /// directory, symlinks resolved when the root exists).
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        let absolute = std::path::absolute(root).unwrap_or_else(|_| root.to_path_buf());
        let lexical = normalize(&absolute);

        let mut existing = lexical.as_path();
        let mut missing = Vec::new();
        while std::fs::symlink_metadata(existing).is_err() {
            match (existing.parent(), existing.file_name()) {
                (Some(parent), Some(name)) => {
                    missing.push(name.to_os_string());
                    existing = parent;
                }
                _ => break,
            }
        }
        let root = match std::fs::canonicalize(existing) {
            Ok(mut real) => {
                real.extend(missing.iter().rev());
                real
            }
            Err(_) => lexical,
        };
        Self { root }
    }

    /// Workspace root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `raw` against the root, refusing anything outside it.
    ///
    /// The check runs on the real path: existing components have their
    /// symlinks followed, so a link inside the workspace cannot point out of
    /// it. Components that do not exist yet are appended as given.
    pub async fn resolve(&self, raw: &str) -> Result<PathBuf> {
        let path = Path::new(raw);
        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };
        let lexical = normalize(&joined);
        if !lexical.starts_with(&self.root) {
            return Err(self.outside(raw));
        }

        let mut existing = lexical.as_path();
        let mut missing = Vec::new();
        while tokio::fs::symlink_metadata(existing).await.is_err() {
            match (existing.parent(), existing.file_name()) {
                (Some(parent), Some(name)) => {
                    missing.push(name.to_os_string());
                    existing = parent;
                }
                _ => break,
            }
        }

        // Fails for dangling links too, which must not be written through.
        let mut real = tokio::fs::canonicalize(existing)
            .await
            .map_err(|_| self.outside(raw))?;
        real.extend(missing.iter().rev());
        if !real.starts_with(&self.root) {
            warn!("{} resolves to {}, outside the workspace", raw, real.display());
            return Err(self.outside(raw));
        }
        Ok(real)
    }

    fn outside(&self, raw: &str) -> ToolError {
        ToolError::PermissionDenied(format!(
            "{raw} is outside the workspace {}",
            self.root.display()
        ))
    }
}

/// Lexically remove `.` and `..` components.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn str_arg<'a>(arguments: &'a Value, key: &str) -> Result<&'a str> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::InvalidInput(format!("missing string argument '{key}'")))
}

fn io_failure(action: &str, path: &Path, e: std::io::Error) -> ToolError {
    match e.kind() {
        std::io::ErrorKind::NotFound => {
            ToolError::ExecutionFailed(format!("{} not found", path.display()))
        }
        _ => ToolError::ExecutionFailed(format!("failed to {action} {}: {e}", path.display())),
    }
}

/// Read a UTF-8 text file.
pub struct ReadFileTool {
    workspace: Workspace,
}

impl ReadFileTool {
    /// Create the capability.
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Capability for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a text file. Relative paths resolve against the workspace root."
    }

    fn parameter_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "File to read"},
                "max_bytes": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "Truncate the content to this many bytes"
                }
            },
            "required": ["path"]
        })
    }

    fn required_permission(&self) -> Permission {
        Permission::Read
    }

    async fn execute(&self, arguments: &Value) -> Result<String> {
        let path = self.workspace.resolve(str_arg(arguments, "path")?).await?;
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| io_failure("read", &path, e))?;
        let content = String::from_utf8(bytes).map_err(|_| {
            ToolError::ExecutionFailed(format!("{} is not a UTF-8 text file", path.display()))
        })?;

        let limit = arguments
            .get("max_bytes")
            .and_then(Value::as_u64)
            .map(|n| n as usize);
        match limit {
            Some(limit) if content.len() > limit => {
                let mut end = limit;
                while !content.is_char_boundary(end) {
                    end -= 1;
                }
                Ok(format!(
                    "{}\n[truncated: showing {} of {} bytes]",
                    &content[..end],
                    end,
                    content.len()
                ))
            }
            _ => Ok(content),
        }
    }
}

/// List the entries of a directory.
pub struct ListDirectoryTool {
    workspace: Workspace,
    max_entries: usize,
}

impl ListDirectoryTool {
    /// Create the capability.
    pub fn new(workspace: Workspace) -> Self {
        Self {
            workspace,
            max_entries: MAX_LIST_ENTRIES,
        }
    }

    /// Stop listing after `max_entries` entries.
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries.max(1);
        self
    }
}

#[async_trait]
impl Capability for ListDirectoryTool {
    fn name(&self) -> &str {
        "list_directory"
    }

    fn description(&self) -> &str {
        "List files and directories. Directories end with '/'."
    }

    fn parameter_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Directory to list (default: workspace root)"},
                "recursive": {"type": "boolean", "description": "Descend into subdirectories"},
                "max_depth": {"type": "integer", "minimum": 1, "description": "Depth limit when recursive (default 3)"}
            }
        })
    }

    fn required_permission(&self) -> Permission {
        Permission::Read
    }

    async fn execute(&self, arguments: &Value) -> Result<String> {
        let raw = arguments.get("path").and_then(Value::as_str).unwrap_or(".");
        let root = self.workspace.resolve(raw).await?;
        let recursive = arguments
            .get("recursive")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let max_depth = if recursive {
            arguments
                .get("max_depth")
                .and_then(Value::as_u64)
                .unwrap_or(3) as usize
        } else {
            1
        };

        let mut entries = Vec::new();
        let mut stopped_early = false;
        let mut pending = vec![(root.clone(), 1usize)];
        while let Some((dir, depth)) = pending.pop() {
            let mut reader = tokio::fs::read_dir(&dir)
                .await
                .map_err(|e| io_failure("list", &dir, e))?;
            while let Some(entry) = reader
                .next_entry()
                .await
                .map_err(|e| io_failure("list", &dir, e))?
            {
                let path = entry.path();
                let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
                let relative = path.strip_prefix(&root).unwrap_or(&path).to_string_lossy().into_owned();
                if is_dir {
                    entries.push(format!("{relative}/"));
                    if depth < max_depth {
                        pending.push((path, depth + 1));
                    }
                } else {
                    entries.push(relative);
                }
            }
            if entries.len() >= self.max_entries && !pending.is_empty() {
                stopped_early = true;
                break;
            }
        }

        if entries.is_empty() {
            return Ok(format!("{} is empty", root.display()));
        }
        entries.sort();
        let truncated = stopped_early || entries.len() > self.max_entries;
        entries.truncate(self.max_entries);
        let mut out = entries.join("\n");
        if truncated {
            out.push_str(&format!("\n[truncated after {} entries]", self.max_entries));
        }
        Ok(out)
    }
}

/// Similarity search over the knowledge base.
pub struct SearchKnowledgeTool {
    retrieval: Arc<RetrievalService>,
}

impl SearchKnowledgeTool {
    /// Create the capability.
    pub fn new(retrieval: Arc<RetrievalService>) -> Self {
        Self { retrieval }
    }
}

#[async_trait]
impl Capability for SearchKnowledgeTool {
    fn name(&self) -> &str {
        "search_knowledge"
    }

    fn description(&self) -> &str {
        "Search the indexed knowledge base for passages relevant to a query."
    }

    fn parameter_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "What to look for"},
                "limit": {"type": "integer", "minimum": 1, "maximum": 20, "description": "Number of results"}
            },
            "required": ["query"]
        })
    }

    fn required_permission(&self) -> Permission {
        Permission::Read
    }

    async fn execute(&self, arguments: &Value) -> Result<String> {
        let query = str_arg(arguments, "query")?;
        let limit = arguments
            .get("limit")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or_else(|| self.retrieval.top_k());

        let results = self
            .retrieval
            .search(query, limit)
            .await
            .map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
        if results.is_empty() {
            return Ok("No relevant knowledge found.".to_string());
        }
        Ok(format_context(&results))
    }
}

/// Write a text file, replacing any previous content.
pub struct WriteFileTool {
    workspace: Workspace,
}

impl WriteFileTool {
    /// Create the capability.
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Capability for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file, creating parent directories. Overwrites the whole file; \
         the write is not undone if the conversation fails later."
    }

    fn parameter_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "File to write"},
                "content": {"type": "string", "description": "Full new content"}
            },
            "required": ["path", "content"]
        })
    }

    fn required_permission(&self) -> Permission {
        Permission::Write
    }

    async fn execute(&self, arguments: &Value) -> Result<String> {
        let path = self.workspace.resolve(str_arg(arguments, "path")?).await?;
        let content = str_arg(arguments, "content")?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_failure("create", parent, e))?;
        }
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| io_failure("write", &path, e))?;

        debug!("Wrote {} bytes to {}", content.len(), path.display());
        Ok(format!("Wrote {} bytes to {}", content.len(), path.display()))
    }
}

/// Run a program and capture its output.
pub struct RunCommandTool {
    workspace: Workspace,
    timeout: Duration,
}

impl RunCommandTool {
    /// Create the capability; commands are killed after `timeout`.
    pub fn new(workspace: Workspace, timeout: Duration) -> Self {
        Self { workspace, timeout }
    }
}

#[async_trait]
impl Capability for RunCommandTool {
    fn name(&self) -> &str {
        "run_command"
    }

    fn description(&self) -> &str {
        "Run a program with arguments (no shell) and return its exit code and output."
    }

    fn parameter_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {"type": "string", "description": "Program to run"},
                "args": {"type": "array", "items": {"type": "string"}},
                "cwd": {"type": "string", "description": "Working directory (default: workspace root)"}
            },
            "required": ["command"]
        })
    }

    fn required_permission(&self) -> Permission {
        Permission::All
    }

    async fn execute(&self, arguments: &Value) -> Result<String> {
        let program = str_arg(arguments, "command")?;
        let args: Vec<&str> = arguments
            .get("args")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        let cwd = match arguments.get("cwd").and_then(Value::as_str) {
            Some(raw) => self.workspace.resolve(raw).await?,
            None => self.workspace.root().to_path_buf(),
        };

        let mut command = Command::new(program);
        command.args(&args).current_dir(&cwd).kill_on_drop(true);

        debug!("Running {} {:?} in {}", program, args, cwd.display());
        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(ToolError::ExecutionFailed(format!(
                    "failed to run {program}: {e}"
                )))
            }
            Err(_) => {
                warn!("{} timed out after {:?}", program, self.timeout);
                return Err(ToolError::ExecutionFailed(format!(
                    "{program} timed out after {}s",
                    self.timeout.as_secs_f32()
                )));
            }
        };

        let code = output
            .status
            .code()
            .map_or_else(|| "none (terminated by signal)".to_string(), |c| c.to_string());
        Ok(format!(
            "exit code: {}\nstdout:\n{}\nstderr:\n{}",
            code,
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        ))
    }
}

/// Register every built-in capability. Visibility is left to the registry's grant.
pub fn register_builtins(
    registry: &mut CapabilityRegistry,
    config: &PermissionConfig,
    retrieval: Arc<RetrievalService>,
) {
    let workspace = Workspace::new(&config.workspace_root);
    registry.register(Arc::new(ReadFileTool::new(workspace.clone())));
    registry.register(Arc::new(ListDirectoryTool::new(workspace.clone())));
    registry.register(Arc::new(SearchKnowledgeTool::new(retrieval)));
    registry.register(Arc::new(WriteFileTool::new(workspace.clone())));
    registry.register(Arc::new(RunCommandTool::new(
        workspace,
        Duration::from_secs(config.command_timeout_secs),
    )));
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_backend::testing::FakeEmbedder;
    use cortex_core::{metadata_keys, Config, Document};
    use cortex_knowledge::VectorStore;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_workspace_resolution() {
        let dir = tempdir().unwrap();
        let workspace = Workspace::new(dir.path().join("work"));
        let real = std::fs::canonicalize(dir.path()).unwrap().join("work");
        assert_eq!(workspace.root(), real.as_path());

        assert_eq!(workspace.resolve("a/b.md").await.unwrap(), real.join("a/b.md"));
        assert_eq!(workspace.resolve("./a/../c").await.unwrap(), real.join("c"));
        let absolute = real.join("x");
        assert_eq!(
            workspace.resolve(absolute.to_str().unwrap()).await.unwrap(),
            absolute
        );
        assert!(matches!(
            workspace.resolve("../etc/passwd").await,
            Err(ToolError::PermissionDenied(_))
        ));
        assert!(workspace.resolve("/etc/passwd").await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlinks_cannot_leave_workspace() {
        use std::os::unix::fs::symlink;

        let dir = tempdir().unwrap();
        let root = dir.path().join("ws");
        let outside = dir.path().join("outside");
        std::fs::create_dir_all(root.join("sub")).unwrap();
        std::fs::create_dir_all(&outside).unwrap();
        std::fs::write(outside.join("secret.txt"), "TOP SECRET").unwrap();
        std::fs::write(root.join("sub/notes.md"), "inside").unwrap();
        symlink(&outside, root.join("link")).unwrap();
        symlink(outside.join("absent.txt"), root.join("dangling")).unwrap();
        symlink(root.join("sub"), root.join("alias")).unwrap();

        let workspace = Workspace::new(&root);
        let read = ReadFileTool::new(workspace.clone());
        let write = WriteFileTool::new(workspace.clone());
        let list = ListDirectoryTool::new(workspace);

        let err = read
            .execute(&json!({"path": "link/secret.txt"}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), cortex_core::ErrorKind::PermissionDenied);

        let err = write
            .execute(&json!({"path": "link/planted.txt", "content": "x"}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), cortex_core::ErrorKind::PermissionDenied);
        assert!(!outside.join("planted.txt").exists());

        let err = write
            .execute(&json!({"path": "dangling", "content": "x"}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), cortex_core::ErrorKind::PermissionDenied);
        assert!(!outside.join("absent.txt").exists());

        let err = list.execute(&json!({"path": "link"})).await.unwrap_err();
        assert_eq!(err.kind(), cortex_core::ErrorKind::PermissionDenied);

        // Links that stay inside the workspace keep working.
        assert_eq!(
            read.execute(&json!({"path": "alias/notes.md"})).await.unwrap(),
            "inside"
        );
    }

    #[tokio::test]
    async fn test_read_file() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.md"), "hello world").unwrap();
        let tool = ReadFileTool::new(Workspace::new(dir.path()));

        assert_eq!(tool.execute(&json!({"path": "a.md"})).await.unwrap(), "hello world");

        let truncated = tool
            .execute(&json!({"path": "a.md", "max_bytes": 5}))
            .await
            .unwrap();
        assert!(truncated.starts_with("hello\n[truncated"));

        let err = tool.execute(&json!({"path": "missing.md"})).await.unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed(_)));
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn test_list_directory() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub/deeper")).unwrap();
        std::fs::write(dir.path().join("b.txt"), "").unwrap();
        std::fs::write(dir.path().join("sub/c.txt"), "").unwrap();
        let tool = ListDirectoryTool::new(Workspace::new(dir.path()));

        let flat = tool.execute(&json!({})).await.unwrap();
        assert_eq!(flat, "b.txt\nsub/");

        let deep = tool.execute(&json!({"recursive": true})).await.unwrap();
        assert_eq!(deep, "b.txt\nsub/\nsub/c.txt\nsub/deeper/");
    }

    #[tokio::test]
    async fn test_list_directory_reports_cut_off_walk() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("a.txt"), "").unwrap();
        std::fs::write(dir.path().join("sub/c.txt"), "").unwrap();
        let tool = ListDirectoryTool::new(Workspace::new(dir.path())).with_max_entries(2);

        // Exactly at the limit with `sub/` still unvisited.
        let out = tool.execute(&json!({"recursive": true})).await.unwrap();
        assert_eq!(out, "a.txt\nsub/\n[truncated after 2 entries]");

        // Exactly at the limit with nothing left to visit.
        let out = tool.execute(&json!({})).await.unwrap();
        assert_eq!(out, "a.txt\nsub/");
    }

    #[tokio::test]
    async fn test_write_file_creates_parents() {
        let dir = tempdir().unwrap();
        let tool = WriteFileTool::new(Workspace::new(dir.path()));

        let out = tool
            .execute(&json!({"path": "notes/new.md", "content": "fresh"}))
            .await
            .unwrap();
        assert!(out.starts_with("Wrote 5 bytes"));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("notes/new.md")).unwrap(),
            "fresh"
        );

        let err = tool
            .execute(&json!({"path": "../escape.md", "content": "x"}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), cortex_core::ErrorKind::PermissionDenied);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_command() {
        let dir = tempdir().unwrap();
        let tool = RunCommandTool::new(Workspace::new(dir.path()), Duration::from_secs(10));

        let out = tool
            .execute(&json!({"command": "echo", "args": ["hello"]}))
            .await
            .unwrap();
        assert!(out.starts_with("exit code: 0\nstdout:\nhello"));

        let slow = RunCommandTool::new(Workspace::new(dir.path()), Duration::from_millis(100));
        let err = slow
            .execute(&json!({"command": "sleep", "args": ["5"]}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));

        let err = tool
            .execute(&json!({"command": "definitely-not-a-program-xyz"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::ExecutionFailed(_)));
    }

    #[tokio::test]
    async fn test_search_knowledge() {
        let store = Arc::new(VectorStore::new());
        let content = "rust ownership rules";
        store
            .add_or_replace(
                Document::new("a", content, FakeEmbedder::vector_for(content))
                    .with_metadata(metadata_keys::SOURCE, "/docs/rust.md"),
            )
            .await;
        let retrieval = Arc::new(RetrievalService::new(
            store,
            Arc::new(FakeEmbedder::new()),
            &Config::default(),
        ));
        let tool = SearchKnowledgeTool::new(retrieval);

        let out = tool.execute(&json!({"query": "ownership"})).await.unwrap();
        assert!(out.contains("/docs/rust.md"));
        assert!(out.contains("rust ownership rules"));
    }

    #[tokio::test]
    async fn test_register_builtins_visibility() {
        let retrieval = Arc::new(RetrievalService::new(
            Arc::new(VectorStore::new()),
            Arc::new(FakeEmbedder::new()),
            &Config::default(),
        ));
        let mut registry = CapabilityRegistry::new(Permission::Read);
        register_builtins(&mut registry, &PermissionConfig::default(), retrieval);

        let names: Vec<String> = registry.specs().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["list_directory", "read_file", "search_knowledge"]);
        assert_eq!(registry.list_available(Permission::All).len(), 5);
    }
}
