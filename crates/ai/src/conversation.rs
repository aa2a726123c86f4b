//! Per-query conversation state.

use cortex_core::{Message, Role};
use regex::Regex;
use std::sync::LazyLock;

static THINK_BLOCK: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?s)<think>.*?</think>").ok());

/// Ordered, append-only message log owned by one query run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationState {
    messages: Vec<Message>,
}

impl ConversationState {
    /// Start a conversation with a system and a user message.
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::system(system), Message::user(user)],
        }
    }

    /// Append a message.
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Messages so far.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Number of messages with `role`.
    pub fn count_role(&self, role: Role) -> usize {
        self.messages.iter().filter(|m| m.role == role).count()
    }

    /// Consume the state.
    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }
}

/// Persona followed by the names of the capabilities on offer.
pub fn system_prompt(persona: &str, capability_names: &[String]) -> String {
    if capability_names.is_empty() {
        return persona.to_string();
    }
    format!(
        "{persona}\n\nYou have access to these tools: {}",
        capability_names.join(", ")
    )
}

/// The query, preceded by the retrieved context when there is any.
pub fn user_message(query: &str, context: &str) -> String {
    if context.trim().is_empty() {
        query.to_string()
    } else {
        format!("{}\n\nQuestion: {}", context.trim_end(), query)
    }
}

/// Remove `<think>…</think>` reasoning blocks from a model answer.
pub fn strip_think(content: &str) -> String {
    match THINK_BLOCK.as_ref() {
        Some(re) if content.contains("<think>") => re.replace_all(content, "").trim().to_string(),
        _ => content.to_string(),
    }
}

const THINK_OPEN: &str = "<think>";
const THINK_CLOSE: &str = "</think>";

/// Incremental [`strip_think`] for streamed text, where a tag may be split
/// across fragments.
#[derive(Debug, Default)]
pub struct ThinkFilter {
    inside: bool,
    started: bool,
    pending: String,
}

impl ThinkFilter {
    /// Feed one fragment; returns the text that is safe to show.
    pub fn push(&mut self, fragment: &str) -> String {
        self.pending.push_str(fragment);
        let mut visible = String::new();
        loop {
            let tag = if self.inside { THINK_CLOSE } else { THINK_OPEN };
            if let Some(pos) = self.pending.find(tag) {
                if !self.inside {
                    visible.push_str(&self.pending[..pos]);
                }
                self.pending.drain(..pos + tag.len());
                self.inside = !self.inside;
                continue;
            }

            // Hold back a trailing prefix of the tag until the next fragment.
            let held = (1..tag.len())
                .rev()
                .find(|&k| self.pending.ends_with(&tag[..k]))
                .unwrap_or(0);
            let split = self.pending.len() - held;
            if !self.inside {
                visible.push_str(&self.pending[..split]);
            }
            self.pending.drain(..split);
            return self.emit(visible);
        }
    }

    /// Flush what is left once the stream ends.
    pub fn finish(&mut self) -> String {
        let rest = std::mem::take(&mut self.pending);
        if self.inside {
            String::new()
        } else {
            self.emit(rest)
        }
    }

    fn emit(&mut self, text: String) -> String {
        if self.started {
            return text;
        }
        let text = text.trim_start().to_string();
        self.started = !text.is_empty();
        text
    }
}
