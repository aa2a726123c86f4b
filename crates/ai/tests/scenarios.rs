//! End-to-end scenarios over the assistant with in-memory backends.

use cortex_ai::{Assistant, CancellationToken, StreamEvent, Termination};
use cortex_backend::testing::{FakeEmbedder, ScriptedBackend};
use cortex_backend::ChatResponse;
use cortex_core::{CapabilityCall, Config, Permission, Role};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tempfile::{tempdir, TempDir};

fn config_in(dir: &Path, granted: Permission) -> Config {
    let mut config = Config::default()
        .with_storage_path(dir.join("data"))
        .with_permission(granted);
    config.permissions.workspace_root = dir.join("workspace");
    config
}

fn assistant(dir: &TempDir, backend: Arc<ScriptedBackend>) -> Assistant {
    Assistant::with_default_capabilities(
        config_in(dir.path(), Permission::Read),
        backend,
        Arc::new(FakeEmbedder::new()),
    )
    .unwrap()
}

fn six_hundred_bytes() -> String {
    "Capabilities are permission gated. ".chars().cycle().take(600).collect()
}

#[tokio::test]
async fn test_reindexing_directory_is_idempotent() {
    let dir = tempdir().unwrap();
    let docs = dir.path().join("docs");
    std::fs::create_dir_all(&docs).unwrap();
    std::fs::write(docs.join("a.md"), six_hundred_bytes()).unwrap();

    let assistant = assistant(&dir, Arc::new(ScriptedBackend::default()));

    assert_eq!(assistant.index_directory(&docs).await.unwrap(), 1);
    assert_eq!(assistant.knowledge_count().await, 2);

    assert_eq!(assistant.index_directory(&docs).await.unwrap(), 1);
    assert_eq!(assistant.knowledge_count().await, 2);
}

#[tokio::test]
async fn test_empty_store_still_answers() {
    let dir = tempdir().unwrap();
    let backend = Arc::new(ScriptedBackend::new([ChatResponse::answer(
        "read_file returns the contents of a file.",
    )]));
    let assistant = assistant(&dir, backend.clone());

    let query = "What does `read_file` do?";
    let answer = assistant.ask(query).await.unwrap();
    assert_eq!(answer.content, "read_file returns the contents of a file.");

    let request = &backend.requests()[0];
    assert_eq!(request.messages[1].role, Role::User);
    assert_eq!(request.messages[1].content, query);
}

#[tokio::test]
async fn test_unknown_capability_reported_to_model() {
    let dir = tempdir().unwrap();
    let backend = Arc::new(ScriptedBackend::new([
        ChatResponse::with_calls(
            "",
            vec![CapabilityCall::new("delete_everything", json!({}))],
        ),
        ChatResponse::answer("I can't delete everything."),
    ]));
    let assistant = assistant(&dir, backend.clone());

    let answer = assistant.ask("Please wipe the disk").await.unwrap();
    assert_eq!(answer.termination, Termination::FinalAnswer);
    assert_eq!(backend.call_count(), 2);

    let tool = answer
        .messages
        .iter()
        .find(|m| m.role == Role::Tool)
        .unwrap();
    assert!(tool.content.contains("not found"));
}

#[tokio::test]
async fn test_hidden_write_capability_is_not_found() {
    let dir = tempdir().unwrap();
    let backend = Arc::new(ScriptedBackend::new([
        ChatResponse::with_calls(
            "",
            vec![CapabilityCall::new(
                "write_file",
                json!({"path": "x.md", "content": "nope"}),
            )],
        ),
        ChatResponse::answer("done"),
    ]));
    let assistant = assistant(&dir, backend);

    let answer = assistant.ask("write x.md").await.unwrap();
    let tool = answer
        .messages
        .iter()
        .find(|m| m.role == Role::Tool)
        .unwrap();
    assert!(tool.content.contains("not found"));
    assert!(!dir.path().join("workspace/x.md").exists());
}

#[tokio::test]
async fn test_loop_is_bounded() {
    let dir = tempdir().unwrap();
    let backend = Arc::new(ScriptedBackend::repeating(ChatResponse::with_calls(
        "",
        vec![CapabilityCall::new("list_directory", json!({}))],
    )));
    let assistant = assistant(&dir, backend.clone());
    let limit = assistant.config().orchestrator.max_tool_iterations;

    let answer = assistant.ask("keep going").await.unwrap();
    assert_eq!(answer.termination, Termination::IterationLimit);
    assert!(answer.content.contains("exceeded maximum tool iterations"));
    assert_eq!(backend.call_count(), limit);
}

#[tokio::test]
async fn test_read_grant_hides_write_and_all() {
    let dir = tempdir().unwrap();
    let read_only = assistant(&dir, Arc::new(ScriptedBackend::default()));
    let names: Vec<String> = read_only
        .available_capabilities()
        .into_iter()
        .map(|s| s.name)
        .collect();
    assert_eq!(names, vec!["list_directory", "read_file", "search_knowledge"]);
    assert!(read_only
        .available_capabilities()
        .iter()
        .all(|s| s.required_permission == Permission::Read));

    let everything = Assistant::with_default_capabilities(
        config_in(dir.path(), Permission::All),
        Arc::new(ScriptedBackend::default()),
        Arc::new(FakeEmbedder::new()),
    )
    .unwrap();
    assert_eq!(everything.available_capabilities().len(), 5);
}

#[tokio::test]
async fn test_knowledge_survives_restart() {
    let dir = tempdir().unwrap();
    let docs = dir.path().join("docs");
    std::fs::create_dir_all(&docs).unwrap();
    std::fs::write(docs.join("a.md"), six_hundred_bytes()).unwrap();

    let first = assistant(&dir, Arc::new(ScriptedBackend::default()));
    first.index_directory(&docs).await.unwrap();
    first.add_knowledge("The orchestrator bounds tool rounds.").await.unwrap();
    assert_eq!(first.knowledge_count().await, 3);

    let second = assistant(&dir, Arc::new(ScriptedBackend::default()));
    assert_eq!(second.load_knowledge().await.unwrap(), 3);
    let id = second.add_knowledge("Another fact.").await.unwrap();
    assert_eq!(id, "knowledge-1");

    second.clear_knowledge().await.unwrap();
    let third = assistant(&dir, Arc::new(ScriptedBackend::default()));
    assert_eq!(third.load_knowledge().await.unwrap(), 0);
}

#[tokio::test]
async fn test_retrieved_context_precedes_question() {
    let dir = tempdir().unwrap();
    let docs = dir.path().join("docs");
    std::fs::create_dir_all(&docs).unwrap();
    std::fs::write(docs.join("perms.md"), "Permissions are ordered none read write all.").unwrap();

    let backend = Arc::new(ScriptedBackend::new([ChatResponse::answer("ordered")]));
    let assistant = assistant(&dir, backend.clone());
    assistant.index_directory(&docs).await.unwrap();

    assistant.ask("How are permissions ordered?").await.unwrap();
    let user = &backend.requests()[0].messages[1].content;
    assert!(user.starts_with("Relevant context from the knowledge base:"));
    assert!(user.contains("perms.md"));
    assert!(user.ends_with("\n\nQuestion: How are permissions ordered?"));
}

#[tokio::test]
async fn test_read_file_round_trip_through_model() {
    let dir = tempdir().unwrap();
    let workspace = dir.path().join("workspace");
    std::fs::create_dir_all(&workspace).unwrap();
    std::fs::write(workspace.join("notes.md"), "secret sauce").unwrap();

    let backend = Arc::new(ScriptedBackend::new([
        ChatResponse::with_calls(
            "",
            vec![CapabilityCall::new("read_file", json!({"path": "notes.md"}))],
        ),
        ChatResponse::answer("The notes mention secret sauce."),
    ]));
    let assistant = assistant(&dir, backend.clone());

    let answer = assistant.ask("What is in notes.md?").await.unwrap();
    assert_eq!(answer.tool_calls, 1);
    let second = &backend.requests()[1];
    assert_eq!(second.messages.last().unwrap().content, "secret sauce");
}

#[tokio::test]
async fn test_stream_reports_progress() {
    let dir = tempdir().unwrap();
    let backend = Arc::new(ScriptedBackend::new([
        ChatResponse::with_calls(
            "",
            vec![CapabilityCall::new("delete_everything", json!({}))],
        ),
        ChatResponse::answer("Nothing was deleted."),
    ]));
    let assistant = assistant(&dir, backend);

    let mut rx = assistant.stream("delete it all", CancellationToken::new());
    let mut saw_error_result = false;
    let mut final_answer = None;
    while let Some(event) = rx.recv().await {
        match event.unwrap() {
            StreamEvent::ToolResult { is_error, .. } => saw_error_result |= is_error,
            StreamEvent::Done(answer) => final_answer = Some(answer),
            _ => {}
        }
    }

    assert!(saw_error_result);
    assert_eq!(final_answer.unwrap().content, "Nothing was deleted.");
}
