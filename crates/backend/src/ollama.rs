//! Ollama HTTP binding.
//!
//! Implements chat (blocking and streamed) with tool calling against
//! `/api/chat`, and embeddings against `/api/embeddings`.

use crate::r#trait::{
    BackendError, ChatBackend, ChatChunk, ChatRequest, ChatResponse, ChatStream,
    EmbeddingBackend, Result,
};
use async_trait::async_trait;
use cortex_core::{CapabilityCall, Message, Role};
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::{Client, ClientBuilder, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

/// Ollama client.
#[derive(Clone)]
pub struct OllamaClient {
    /// HTTP client
    client: Client,

    /// Ollama server URL
    url: String,
}

impl OllamaClient {
    /// Create a new Ollama client.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: ClientBuilder::new()
                .connect_timeout(std::time::Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            url: url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Server URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Check if the Ollama server is available.
    pub async fn health_check(&self) -> Result<bool> {
        let response = self
            .client
            .get(format!("{}/api/version", self.url))
            .send()
            .await
            .map_err(unavailable)?;

        Ok(response.status().is_success())
    }

    async fn post_chat(&self, request: &ChatRequest, streaming: bool) -> Result<Response> {
        let payload = chat_payload(request, streaming);
        debug!(
            "Sending chat request ({} messages, {} tools, stream={})",
            request.messages.len(),
            request.capabilities.len(),
            streaming
        );

        let response = self
            .client
            .post(format!("{}/api/chat", self.url))
            .json(&payload)
            .send()
            .await
            .map_err(unavailable)?;

        ensure_success(response).await
    }
}

#[async_trait]
impl ChatBackend for OllamaClient {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let response = self.post_chat(request, false).await?;
        let body: OllamaChatResponse = response.json().await?;
        if let Some(error) = body.error {
            return Err(BackendError::InvalidResponse(error));
        }
        let message = body
            .message
            .ok_or_else(|| BackendError::InvalidResponse("response has no message".into()))?;

        Ok(ChatResponse {
            content: message.content,
            calls: message.tool_calls.into_iter().map(into_call).collect(),
        })
    }

    async fn chat_stream(&self, request: &ChatRequest) -> Result<ChatStream> {
        let response = self.post_chat(request, true).await?;
        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()))
            .boxed();
        Ok(ndjson_chunks(bytes))
    }
}

#[async_trait]
impl EmbeddingBackend for OllamaClient {
    async fn embed(&self, model: &str, input: &str) -> Result<Vec<f32>> {
        let payload = json!({
            "model": model,
            "prompt": input,
        });

        debug!("Generating embedding for text ({} chars)", input.len());

        let response = self
            .client
            .post(format!("{}/api/embeddings", self.url))
            .json(&payload)
            .send()
            .await
            .map_err(unavailable)?;
        let response = ensure_success(response).await?;

        #[derive(Deserialize)]
        struct EmbeddingResponse {
            embedding: Vec<f32>,
        }

        let data: EmbeddingResponse = response.json().await?;
        if data.embedding.is_empty() {
            return Err(BackendError::InvalidResponse(format!(
                "model {model} returned an empty embedding"
            )));
        }
        Ok(data.embedding)
    }
}

fn unavailable(e: reqwest::Error) -> BackendError {
    if e.is_connect() || e.is_timeout() {
        BackendError::Unavailable(e.to_string())
    } else {
        BackendError::Http(e)
    }
}

async fn ensure_success(response: Response) -> Result<Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(BackendError::Api { status, body })
}

fn chat_payload(request: &ChatRequest, streaming: bool) -> Value {
    let messages: Vec<Value> = request.messages.iter().map(message_json).collect();
    let tools: Vec<Value> = request
        .capabilities
        .iter()
        .map(|spec| {
            json!({
                "type": "function",
                "function": {
                    "name": spec.name,
                    "description": spec.description,
                    "parameters": spec.parameter_schema,
                }
            })
        })
        .collect();

    let mut options = json!({ "temperature": request.options.temperature });
    if let Some(num_ctx) = request.options.context_length {
        options["num_ctx"] = json!(num_ctx);
    }

    let mut payload = json!({
        "model": request.model,
        "messages": messages,
        "stream": streaming,
        "options": options,
    });
    if !tools.is_empty() {
        payload["tools"] = Value::Array(tools);
    }
    payload
}

fn message_json(message: &Message) -> Value {
    let mut value = json!({
        "role": message.role.to_string(),
        "content": message.content,
    });
    if message.role == Role::Assistant && !message.requested_calls.is_empty() {
        let calls: Vec<Value> = message
            .requested_calls
            .iter()
            .map(|call| {
                json!({
                    "function": {
                        "name": call.name,
                        "arguments": call.arguments,
                    }
                })
            })
            .collect();
        value["tool_calls"] = Value::Array(calls);
    }
    value
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    #[serde(default)]
    message: Option<OllamaMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<OllamaToolCall>,
}

#[derive(Debug, Deserialize)]
struct OllamaToolCall {
    function: OllamaFunction,
}

#[derive(Debug, Deserialize)]
struct OllamaFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

fn into_call(call: OllamaToolCall) -> CapabilityCall {
    // Some models emit the arguments object as a JSON string.
    let arguments = match call.function.arguments {
        Value::String(raw) => serde_json::from_str(&raw).unwrap_or(Value::String(raw)),
        Value::Null => json!({}),
        other => other,
    };
    CapabilityCall::new(call.function.name, arguments)
}

fn parse_chunk(line: &[u8]) -> Result<ChatChunk> {
    let body: OllamaChatResponse = serde_json::from_slice(line)?;
    if let Some(error) = body.error {
        return Err(BackendError::InvalidResponse(error));
    }
    let (content, calls) = match body.message {
        Some(message) => (
            message.content,
            message.tool_calls.into_iter().map(into_call).collect(),
        ),
        None => (String::new(), Vec::new()),
    };
    Ok(ChatChunk {
        content,
        calls,
        done: body.done,
    })
}

struct LineState {
    inner: BoxStream<'static, std::result::Result<Vec<u8>, reqwest::Error>>,
    buffer: Vec<u8>,
    finished: bool,
}

/// Split a byte stream of newline-delimited JSON objects into chunks.
fn ndjson_chunks(
    inner: BoxStream<'static, std::result::Result<Vec<u8>, reqwest::Error>>,
) -> ChatStream {
    let state = LineState {
        inner,
        buffer: Vec::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(pos) = state.buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = state.buffer.drain(..=pos).collect();
                if line.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                return Some((parse_chunk(&line), state));
            }

            if state.finished {
                if state.buffer.iter().all(u8::is_ascii_whitespace) {
                    return None;
                }
                let line = std::mem::take(&mut state.buffer);
                return Some((parse_chunk(&line), state));
            }

            match state.inner.next().await {
                Some(Ok(bytes)) => state.buffer.extend_from_slice(&bytes),
                Some(Err(e)) => {
                    state.finished = true;
                    state.buffer.clear();
                    return Some((Err(BackendError::Http(e)), state));
                }
                None => state.finished = true,
            }
        }
    })
    .boxed()
}
