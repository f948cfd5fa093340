//! Initiator classification.
//!
//! Decides whether the current turn of a conversation was started by a
//! person or by an agent loop. The result is only advisory: it becomes the
//! upstream `X-Initiator` header and never changes message content.

use std::fmt;

use axum::http::HeaderMap;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::transformer::anthropic::{
    AnthropicContent, AnthropicContentBlock, AnthropicMessage, AnthropicRole,
};
use crate::transformer::openai::{ChatContent, ChatMessage, ChatRole, ContentPart};

/// Text a harness puts at the start of a handed-off conversation.
const HANDOFF_PREFIX: &str = "Another language model started to solve this problem";

/// Marker in compaction prompts.
const COMPACTION_MARKER: &str = "CONTEXT CHECKPOINT COMPACTION";

const ENVIRONMENT_CONTEXT_TAGS: &[&str] = &["<environment_context>", "</environment_context>"];

/// User-agent fragments of agent harnesses (lower-case).
const AGENT_USER_AGENTS: &[&str] = &["codex", "claude-cli", "claude-code"];

/// Minimum length, in characters, for the vocabulary heuristic.
const SYNTHETIC_MIN_CHARS: usize = 800;

static COMPACTION_VOCABULARY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)summary|summarize|compress(ion)?|compact(ion)?|context window|handoff|conversation",
    )
    .expect("compaction vocabulary regex is valid")
});

/// Who started a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Initiator {
    Agent,
    User,
}

impl Initiator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Initiator::Agent => "agent",
            Initiator::User => "user",
        }
    }

    /// Parse `agent` / `user`, ignoring case and surrounding whitespace.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "agent" => Some(Initiator::Agent),
            "user" => Some(Initiator::User),
            _ => None,
        }
    }

    /// Client-forced initiator from the `x-initiator` request header.
    pub fn from_override(headers: &HeaderMap) -> Option<Self> {
        headers
            .get("x-initiator")
            .and_then(|v| v.to_str().ok())
            .and_then(Self::parse)
    }
}

impl fmt::Display for Initiator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the client told us about itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientHints<'a> {
    pub user_agent: Option<&'a str>,
    pub anthropic_beta: Option<&'a str>,
}

impl<'a> ClientHints<'a> {
    pub fn from_headers(headers: &'a HeaderMap) -> Self {
        let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
        Self {
            user_agent: header("user-agent"),
            anthropic_beta: header("anthropic-beta"),
        }
    }

    /// True for known agent harnesses.
    pub fn is_agent_client(&self) -> bool {
        let agent_user_agent = self.user_agent.is_some_and(|ua| {
            let ua = ua.to_ascii_lowercase();
            AGENT_USER_AGENTS.iter().any(|pattern| ua.contains(pattern))
        });
        agent_user_agent || has_claude_code_beta(self.anthropic_beta)
    }
}

/// True when any `anthropic-beta` token starts with `claude-code`.
pub fn has_claude_code_beta(anthropic_beta: Option<&str>) -> bool {
    anthropic_beta.is_some_and(|header| {
        header
            .split(',')
            .map(|token| token.trim().to_ascii_lowercase())
            .any(|token| token.starts_with("claude-code"))
    })
}

/// Role of a message as far as classification is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    System,
    User,
    Assistant,
    Tool,
    Other,
}

/// Message shape the classifier can inspect.
pub trait ConversationMessage {
    fn speaker(&self) -> Speaker;

    /// User turn that carries a tool result.
    fn has_tool_result(&self) -> bool;

    /// Assistant turn that asked for a tool call.
    fn requests_tool_call(&self) -> bool;

    /// Plain text of the message, parts joined by a blank line.
    fn text(&self) -> String;
}

impl ConversationMessage for AnthropicMessage {
    fn speaker(&self) -> Speaker {
        match self.role {
            AnthropicRole::User => Speaker::User,
            AnthropicRole::Assistant => Speaker::Assistant,
        }
    }

    fn has_tool_result(&self) -> bool {
        self.content
            .blocks()
            .iter()
            .any(|block| matches!(block, AnthropicContentBlock::ToolResult { .. }))
    }

    fn requests_tool_call(&self) -> bool {
        self.content
            .blocks()
            .iter()
            .any(|block| matches!(block, AnthropicContentBlock::ToolUse { .. }))
    }

    fn text(&self) -> String {
        match &self.content {
            AnthropicContent::Text(text) => text.clone(),
            AnthropicContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|block| match block {
                    AnthropicContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n\n"),
        }
    }
}

impl ConversationMessage for ChatMessage {
    fn speaker(&self) -> Speaker {
        match self.role {
            ChatRole::System | ChatRole::Developer => Speaker::System,
            ChatRole::User => Speaker::User,
            ChatRole::Assistant => Speaker::Assistant,
            ChatRole::Tool => Speaker::Tool,
            ChatRole::Unknown => Speaker::Other,
        }
    }

    fn has_tool_result(&self) -> bool {
        false
    }

    fn requests_tool_call(&self) -> bool {
        self.tool_calls.as_ref().is_some_and(|calls| !calls.is_empty())
    }

    fn text(&self) -> String {
        match &self.content {
            Some(ChatContent::Text(text)) => text.clone(),
            Some(ChatContent::Parts(parts)) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } | ContentPart::OutputText { text } => {
                        Some(text.as_str())
                    }
                    ContentPart::Reasoning(detail) | ContentPart::Thinking(detail) => {
                        detail.reasoning_text()
                    }
                    ContentPart::ImageUrl { .. } | ContentPart::Other => None,
                })
                .collect::<Vec<_>>()
                .join("\n\n"),
            None => String::new(),
        }
    }
}

/// Classify the turn that ends `messages`.
pub fn infer_initiator<M: ConversationMessage>(
    messages: &[M],
    hints: &ClientHints<'_>,
) -> Initiator {
    let mut conversation = messages
        .iter()
        .rev()
        .filter(|message| message.speaker() != Speaker::System);

    let Some(last) = conversation.next() else {
        return Initiator::User;
    };

    match last.speaker() {
        Speaker::Assistant | Speaker::Tool => return Initiator::Agent,
        Speaker::User => {}
        Speaker::System | Speaker::Other => return Initiator::User,
    }

    if last.has_tool_result() {
        return Initiator::Agent;
    }

    let Some(previous) = conversation.next() else {
        return Initiator::User;
    };
    if previous.speaker() != Speaker::Assistant {
        return Initiator::User;
    }
    if previous.requests_tool_call() {
        return Initiator::Agent;
    }

    if is_synthetic_continuation(&last.text(), hints) {
        Initiator::Agent
    } else {
        Initiator::User
    }
}

/// Text that looks generated by a harness rather than typed by a person.
///
/// Only meaningful for a user turn that directly follows an assistant turn.
fn is_synthetic_continuation(text: &str, hints: &ClientHints<'_>) -> bool {
    let text = text.trim();
    if text.is_empty() {
        return false;
    }

    if text.starts_with(HANDOFF_PREFIX)
        || text.contains(COMPACTION_MARKER)
        || ENVIRONMENT_CONTEXT_TAGS.iter().any(|tag| text.contains(tag))
    {
        return true;
    }

    hints.is_agent_client()
        && text.chars().count() >= SYNTHETIC_MIN_CHARS
        && COMPACTION_VOCABULARY.is_match(text)
}
