//! Tool-augmented conversation loop.
//!
//! One query runs as a sequence of rounds: send the conversation to the
//! model, and if it asks for capability calls, run them in order, append
//! their results as tool messages and ask again. The run ends with the
//! first turn that requests no calls, or after `max_tool_iterations` rounds
//! that did.

use crate::conversation::{
    strip_think, system_prompt, user_message, ConversationState, ThinkFilter,
};
use crate::error::{OrchestratorError, Result};
use cortex_backend::{ChatBackend, ChatRequest, ChatResponse, SamplingOptions};
use cortex_core::{CapabilityCall, Config, Message, RunId};
use cortex_knowledge::RetrievalService;
use cortex_tools::CapabilityRegistry;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

/// Buffered events between a streaming run and its consumer.
const STREAM_BUFFER: usize = 64;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The model produced an answer without requesting calls
    FinalAnswer,
    /// The round limit was reached while the model kept requesting calls
    IterationLimit,
}

/// Result of one query run.
#[derive(Debug, Clone)]
pub struct Answer {
    /// Run identifier
    pub run_id: RunId,
    /// Final answer text (reasoning blocks removed)
    pub content: String,
    /// How the run ended
    pub termination: Termination,
    /// Rounds that requested capability calls
    pub iterations: usize,
    /// Capability calls executed
    pub tool_calls: usize,
    /// Full conversation, final assistant turn included
    pub messages: Vec<Message>,
}

/// Progress of a streaming run.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Assistant text as it arrives, `<think>` blocks removed. Text of turns
    /// that go on to request calls is included.
    Fragment(String),
    /// A capability call is about to run
    ToolCall(CapabilityCall),
    /// A capability call finished
    ToolResult {
        /// Capability name
        name: String,
        /// Result or error text, as shown to the model
        output: String,
        /// Whether the call failed
        is_error: bool,
    },
    /// The run finished
    Done(Answer),
}

/// Drives the multi-turn loop between model, retrieval and capabilities.
pub struct ConversationOrchestrator {
    backend: Arc<dyn ChatBackend>,
    registry: Arc<CapabilityRegistry>,
    retrieval: Option<Arc<RetrievalService>>,
    model: String,
    persona: String,
    options: SamplingOptions,
    max_tool_iterations: usize,
    request_timeout: Duration,
}

impl ConversationOrchestrator {
    /// Create an orchestrator. Without `retrieval` queries go out without context.
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        registry: Arc<CapabilityRegistry>,
        retrieval: Option<Arc<RetrievalService>>,
        config: &Config,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            backend,
            registry,
            retrieval,
            model: config.llm.model.clone(),
            persona: config.system_prompt.clone(),
            options: SamplingOptions {
                temperature: config.llm.temperature,
                context_length: config.llm.context_length,
            },
            max_tool_iterations: config.orchestrator.max_tool_iterations,
            request_timeout: config.llm.request_timeout(),
        })
    }

    /// Capability registry in use.
    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    /// Answer `query`.
    pub async fn ask(&self, query: &str) -> Result<Answer> {
        self.ask_with_cancel(query, CancellationToken::new()).await
    }

    /// Answer `query`, giving up with [`OrchestratorError::Cancelled`] once
    /// `cancel` fires. Side effects of calls that already ran are kept.
    pub async fn ask_with_cancel(&self, query: &str, cancel: CancellationToken) -> Result<Answer> {
        self.run(query, &cancel, None).await
    }

    /// Answer `query` in the background, reporting progress on the returned
    /// channel. The last item is either `Done` or the error that ended the run.
    ///
    /// Dropping the receiver stops the run and closes the backend stream.
    pub fn stream(
        self: &Arc<Self>,
        query: impl Into<String>,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<Result<StreamEvent>> {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let this = Arc::clone(self);
        let query = query.into();

        tokio::spawn(async move {
            let result = this.run(&query, &cancel, Some(&tx)).await;
            if tx.send(result.map(StreamEvent::Done)).await.is_err() {
                debug!("Stream consumer went away before the run finished");
            }
        });
        rx
    }

    async fn run(
        &self,
        query: &str,
        cancel: &CancellationToken,
        events: Option<&mpsc::Sender<Result<StreamEvent>>>,
    ) -> Result<Answer> {
        let run_id = RunId::new();
        let span = info_span!("query", run_id = %run_id);
        self.run_loop(run_id, query, cancel, events)
            .instrument(span)
            .await
    }

    async fn run_loop(
        &self,
        run_id: RunId,
        query: &str,
        cancel: &CancellationToken,
        events: Option<&mpsc::Sender<Result<StreamEvent>>>,
    ) -> Result<Answer> {
        info!("Starting query ({} chars)", query.len());

        let context = match &self.retrieval {
            Some(retrieval) => retrieval.retrieve_context(query).await,
            None => String::new(),
        };
        let specs = self.registry.specs();
        let names: Vec<String> = specs.iter().map(|s| s.name.clone()).collect();

        let mut state = ConversationState::new(
            system_prompt(&self.persona, &names),
            user_message(query, &context),
        );
        let mut iterations = 0;
        let mut tool_calls = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(OrchestratorError::Cancelled);
            }

            let request = ChatRequest {
                model: self.model.clone(),
                messages: state.messages().to_vec(),
                capabilities: specs.clone(),
                options: self.options.clone(),
            };
            let response = self.call_backend(&request, cancel, events).await?;

            if response.calls.is_empty() {
                let content = strip_think(&response.content);
                state.push(Message::assistant(content.clone(), Vec::new()));
                info!(
                    "Query finished after {} tool rounds ({} calls)",
                    iterations, tool_calls
                );
                return Ok(Answer {
                    run_id,
                    content,
                    termination: Termination::FinalAnswer,
                    iterations,
                    tool_calls,
                    messages: state.into_messages(),
                });
            }

            iterations += 1;
            debug!(
                "Round {} requested {} capability calls",
                iterations,
                response.calls.len()
            );
            let calls = response.calls.clone();
            state.push(Message::assistant(response.content, response.calls));

            for call in calls {
                emit(events, StreamEvent::ToolCall(call.clone())).await?;

                let outcome = tokio::select! {
                    _ = cancel.cancelled() => return Err(OrchestratorError::Cancelled),
                    outcome = self.registry.execute(&call.name, &call.arguments) => outcome,
                };
                tool_calls += 1;

                let (output, is_error) = match outcome {
                    Ok(output) => (output, false),
                    Err(e) => {
                        warn!("Capability {} failed: {}", call.name, e);
                        (format!("Error: {e}"), true)
                    }
                };
                state.push(Message::tool(output.clone()));
                emit(
                    events,
                    StreamEvent::ToolResult {
                        name: call.name,
                        output,
                        is_error,
                    },
                )
                .await?;
            }

            if iterations >= self.max_tool_iterations {
                warn!(
                    "Stopping after {} tool rounds without a final answer",
                    iterations
                );
                return Ok(Answer {
                    run_id,
                    content: format!(
                        "exceeded maximum tool iterations ({})",
                        self.max_tool_iterations
                    ),
                    termination: Termination::IterationLimit,
                    iterations,
                    tool_calls,
                    messages: state.into_messages(),
                });
            }
        }
    }

    /// One backend round trip, bounded by the request timeout and `cancel`.
    async fn call_backend(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
        events: Option<&mpsc::Sender<Result<StreamEvent>>>,
    ) -> Result<ChatResponse> {
        let call = async {
            match events {
                None => self.backend.chat(request).await.map_err(OrchestratorError::from),
                Some(tx) => self.collect_stream(request, tx).await,
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(OrchestratorError::Cancelled),
            result = tokio::time::timeout(self.request_timeout, call) => match result {
                Ok(response) => response,
                Err(_) => Err(OrchestratorError::Timeout(self.request_timeout)),
            },
        }
    }

    /// Read a streamed turn, forwarding its text as it arrives.
    async fn collect_stream(
        &self,
        request: &ChatRequest,
        tx: &mpsc::Sender<Result<StreamEvent>>,
    ) -> Result<ChatResponse> {
        let mut stream = self.backend.chat_stream(request).await?;
        let mut response = ChatResponse::default();
        let mut filter = ThinkFilter::default();

        loop {
            let next = tokio::select! {
                _ = tx.closed() => return Err(OrchestratorError::Cancelled),
                next = stream.next() => next,
            };
            let Some(chunk) = next else { break };
            let chunk = chunk?;

            if !chunk.content.is_empty() {
                response.content.push_str(&chunk.content);
                forward(tx, filter.push(&chunk.content)).await?;
            }
            response.calls.extend(chunk.calls);
            if chunk.done {
                break;
            }
        }
        forward(tx, filter.finish()).await?;
        Ok(response)
    }
}

async fn forward(tx: &mpsc::Sender<Result<StreamEvent>>, text: String) -> Result<()> {
    if text.is_empty() {
        return Ok(());
    }
    emit(Some(tx), StreamEvent::Fragment(text)).await
}

async fn emit(events: Option<&mpsc::Sender<Result<StreamEvent>>>, event: StreamEvent) -> Result<()> {
    match events {
        Some(tx) => tx
            .send(Ok(event))
            .await
            .map_err(|_| OrchestratorError::Cancelled),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_backend::testing::ScriptedBackend;
    use cortex_core::{ErrorKind, Permission, Role};
    use cortex_tools::{Capability, ToolError};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Add;

    #[async_trait::async_trait]
    impl Capability for Add {
        fn name(&self) -> &str {
            "add"
        }

        fn description(&self) -> &str {
            "Add two integers"
        }

        fn parameter_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": {"a": {"type": "integer"}, "b": {"type": "integer"}},
                "required": ["a", "b"]
            })
        }

        fn required_permission(&self) -> Permission {
            Permission::Read
        }

        async fn execute(&self, arguments: &Value) -> std::result::Result<String, ToolError> {
            let a = arguments["a"].as_i64().unwrap_or_default();
            let b = arguments["b"].as_i64().unwrap_or_default();
            Ok((a + b).to_string())
        }
    }

    fn registry() -> Arc<CapabilityRegistry> {
        let mut registry = CapabilityRegistry::new(Permission::Read);
        registry.register(Arc::new(Add));
        Arc::new(registry)
    }

    fn orchestrator(backend: Arc<ScriptedBackend>, config: &Config) -> ConversationOrchestrator {
        ConversationOrchestrator::new(backend, registry(), None, config).unwrap()
    }

    fn add_call() -> CapabilityCall {
        CapabilityCall::new("add", json!({"a": 2, "b": 3}))
    }

    #[tokio::test]
    async fn test_direct_answer() {
        let backend = Arc::new(ScriptedBackend::new([ChatResponse::answer(
            "<think>easy</think>Hello!",
        )]));
        let answer = orchestrator(backend.clone(), &Config::default())
            .ask("hi")
            .await
            .unwrap();

        assert_eq!(answer.content, "Hello!");
        assert_eq!(answer.termination, Termination::FinalAnswer);
        assert_eq!(answer.iterations, 0);

        let request = &backend.requests()[0];
        assert_eq!(request.messages[1].content, "hi");
        assert!(request.messages[0].content.contains("add"));
        assert_eq!(request.capabilities.len(), 1);
    }

    #[tokio::test]
    async fn test_tool_round_then_answer() {
        let backend = Arc::new(ScriptedBackend::new([
            ChatResponse::with_calls("", vec![add_call(), add_call()]),
            ChatResponse::answer("The sum is 5."),
        ]));
        let answer = orchestrator(backend.clone(), &Config::default())
            .ask("what is 2+3?")
            .await
            .unwrap();

        assert_eq!(answer.content, "The sum is 5.");
        assert_eq!(answer.iterations, 1);
        assert_eq!(answer.tool_calls, 2);

        let second = &backend.requests()[1];
        let roles: Vec<Role> = second.messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::Tool, Role::Tool]
        );
        assert_eq!(second.messages[2].requested_calls.len(), 2);
        assert_eq!(second.messages[3].content, "5");
    }

    #[tokio::test]
    async fn test_tool_errors_are_fed_back() {
        let backend = Arc::new(ScriptedBackend::new([
            ChatResponse::with_calls(
                "",
                vec![
                    CapabilityCall::new("delete_everything", json!({})),
                    CapabilityCall::new("add", json!({"a": "two"})),
                ],
            ),
            ChatResponse::answer("Sorry, I cannot do that."),
        ]));
        let answer = orchestrator(backend.clone(), &Config::default())
            .ask("clean up")
            .await
            .unwrap();
        assert_eq!(answer.termination, Termination::FinalAnswer);

        let tool_messages: Vec<&Message> =
            answer.messages.iter().filter(|m| m.role == Role::Tool).collect();
        assert_eq!(
            tool_messages[0].content,
            "Error: capability not found: delete_everything"
        );
        assert!(tool_messages[1].content.starts_with("Error: invalid arguments"));
    }

    #[tokio::test]
    async fn test_iteration_limit() {
        let backend = Arc::new(ScriptedBackend::repeating(ChatResponse::with_calls(
            "",
            vec![add_call()],
        )));
        let mut config = Config::default();
        config.orchestrator.max_tool_iterations = 3;

        let answer = orchestrator(backend.clone(), &config).ask("loop").await.unwrap();
        assert_eq!(answer.termination, Termination::IterationLimit);
        assert_eq!(answer.content, "exceeded maximum tool iterations (3)");
        assert_eq!(answer.iterations, 3);
        assert_eq!(backend.call_count(), 3);
    }

    #[tokio::test]
    async fn test_backend_failure_is_fatal() {
        let backend = Arc::new(ScriptedBackend::default().then_fail("connection refused"));
        let err = orchestrator(backend, &Config::default())
            .ask("hi")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BackendUnavailable);
    }

    #[tokio::test]
    async fn test_timeout() {
        let backend = Arc::new(
            ScriptedBackend::new([ChatResponse::answer("late")])
                .with_delay(Duration::from_secs(5)),
        );
        let mut orchestrator = orchestrator(backend, &Config::default());
        orchestrator.request_timeout = Duration::from_millis(50);

        let err = orchestrator.ask("hi").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Timeout(_)));
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_cancellation() {
        let backend = Arc::new(
            ScriptedBackend::new([ChatResponse::answer("late")])
                .with_delay(Duration::from_secs(5)),
        );
        let orchestrator = orchestrator(backend, &Config::default());
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = orchestrator.ask_with_cancel("hi", cancel).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }

    struct Sleeper {
        finished: Arc<AtomicBool>,
    }

    #[async_trait::async_trait]
    impl Capability for Sleeper {
        fn name(&self) -> &str {
            "sleeper"
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

        async fn execute(&self, _arguments: &Value) -> std::result::Result<String, ToolError> {
            tokio::time::sleep(Duration::from_millis(300)).await;
            self.finished.store(true, Ordering::SeqCst);
            Ok("awake".to_string())
        }
    }

    #[tokio::test]
    async fn test_cancellation_stops_running_capability() {
        let finished = Arc::new(AtomicBool::new(false));
        let mut registry = CapabilityRegistry::new(Permission::Read);
        registry.register(Arc::new(Sleeper {
            finished: finished.clone(),
        }));
        let backend = Arc::new(ScriptedBackend::new([
            ChatResponse::with_calls("", vec![CapabilityCall::new("sleeper", json!({}))]),
            ChatResponse::answer("rested"),
        ]));
        let orchestrator =
            ConversationOrchestrator::new(backend, Arc::new(registry), None, &Config::default())
                .unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = orchestrator.ask_with_cancel("nap", cancel).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_stream_events() {
        let backend = Arc::new(ScriptedBackend::new([
            ChatResponse::with_calls("", vec![add_call()]),
            ChatResponse::answer("Five."),
        ]));
        let orchestrator = Arc::new(orchestrator(backend, &Config::default()));

        let mut rx = orchestrator.stream("2+3?", CancellationToken::new());
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event.unwrap());
        }

        assert!(matches!(events[0], StreamEvent::ToolCall(_)));
        assert!(matches!(
            &events[1],
            StreamEvent::ToolResult { output, is_error: false, .. } if output == "5"
        ));
        assert!(matches!(&events[2], StreamEvent::Fragment(text) if text == "Five."));
        let StreamEvent::Done(answer) = &events[3] else {
            panic!("expected Done");
        };
        assert_eq!(answer.content, "Five.");
    }

    #[tokio::test]
    async fn test_stream_hides_reasoning() {
        let backend = Arc::new(ScriptedBackend::new([ChatResponse::answer(
            "<think>how many?</think>\n\nFour.",
        )]));
        let orchestrator = Arc::new(orchestrator(backend, &Config::default()));

        let mut rx = orchestrator.stream("2+2?", CancellationToken::new());
        let mut shown = String::new();
        let mut answer = None;
        while let Some(event) = rx.recv().await {
            match event.unwrap() {
                StreamEvent::Fragment(text) => shown.push_str(&text),
                StreamEvent::Done(done) => answer = Some(done),
                _ => {}
            }
        }

        assert_eq!(shown, "Four.");
        assert_eq!(answer.unwrap().content, "Four.");
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = Config::default();
        config.orchestrator.max_tool_iterations = 0;
        let result = ConversationOrchestrator::new(
            Arc::new(ScriptedBackend::default()),
            registry(),
            None,
            &config,
        );
        assert_eq!(result.err().map(|e| e.kind()), Some(ErrorKind::InvalidInput));
    }
}
