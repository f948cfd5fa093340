//! Chat Completions response → Anthropic response.

use std::collections::HashSet;

use serde_json::{Map, Value};

use super::anthropic::{AnthropicContentBlock, AnthropicResponse, AnthropicUsage};
use super::openai::{ChatCompletionResponse, ChatContent, ChatUsage, ContentPart, ToolCall};
use super::StopReason;
use crate::core::error::{AppError, Result};
use crate::core::id_sanitizer::sanitize_id;

/// Translate a non-streaming upstream response.
///
/// Only the first choice is used. Thinking blocks come first, deduplicated by
/// (text, signature), then text, then tool calls.
pub fn translate_response(response: &ChatCompletionResponse) -> Result<AnthropicResponse> {
    let choice = response
        .choices
        .first()
        .ok_or_else(|| AppError::Internal("Upstream response contained no choices".to_string()))?;
    let message = &choice.message;

    let mut blocks = ContentCollector::default();

    blocks.add_thinking(
        message.thinking.as_deref().or(message.reasoning.as_deref()),
        message
            .thinking_signature
            .as_deref()
            .or(message.reasoning_signature.as_deref())
            .or(message.signature.as_deref()),
    );
    for detail in message.reasoning_details.iter().flatten() {
        blocks.add_thinking(detail.reasoning_text(), detail.signature.as_deref());
    }

    match &message.content {
        Some(ChatContent::Text(text)) => blocks.add_text(text),
        Some(ChatContent::Parts(parts)) => {
            for part in parts {
                match part {
                    ContentPart::Text { text } | ContentPart::OutputText { text } => {
                        blocks.add_text(text)
                    }
                    ContentPart::Reasoning(detail) | ContentPart::Thinking(detail) => {
                        blocks.add_thinking(detail.reasoning_text(), detail.signature.as_deref())
                    }
                    ContentPart::ImageUrl { .. } | ContentPart::Other => {}
                }
            }
        }
        None => {}
    }

    let mut content = blocks.into_blocks();
    content.extend(
        message
            .tool_calls
            .iter()
            .flatten()
            .map(translate_tool_call),
    );

    let mut translated = AnthropicResponse::new(response.id.clone(), response.model.clone());
    translated.content = content;
    translated.stop_reason = Some(StopReason::from_finish_reason(
        choice.finish_reason.as_deref().unwrap_or("stop"),
    ));
    translated.usage = translate_usage(response.usage.as_ref());
    Ok(translated)
}

/// Usage with cache hits split out of the input count.
pub fn translate_usage(usage: Option<&ChatUsage>) -> AnthropicUsage {
    let Some(usage) = usage else {
        return AnthropicUsage::default();
    };
    let cached = usage.cached_tokens();
    AnthropicUsage {
        input_tokens: usage.prompt_tokens.saturating_sub(cached.unwrap_or(0)),
        output_tokens: usage.completion_tokens,
        cache_read_input_tokens: cached,
    }
}

fn translate_tool_call(call: &ToolCall) -> AnthropicContentBlock {
    AnthropicContentBlock::ToolUse {
        id: sanitize_id(&call.id),
        name: call.function.name.clone(),
        input: parse_tool_arguments(&call.function.arguments),
    }
}

/// Parse tool arguments as a JSON object; anything else becomes `{}`.
fn parse_tool_arguments(arguments: &str) -> Value {
    match serde_json::from_str::<Value>(arguments) {
        Ok(Value::Object(map)) => Value::Object(map),
        Ok(_) | Err(_) => {
            if !arguments.trim().is_empty() {
                tracing::warn!(
                    arguments_len = arguments.len(),
                    "Tool call arguments are not a JSON object, substituting {{}}"
                );
            }
            Value::Object(Map::new())
        }
    }
}

#[derive(Default)]
struct ContentCollector {
    thinking: Vec<AnthropicContentBlock>,
    text: Vec<AnthropicContentBlock>,
    seen_thinking: HashSet<(String, String)>,
}

impl ContentCollector {
    fn add_thinking(&mut self, thinking: Option<&str>, signature: Option<&str>) {
        let Some(thinking) = thinking.filter(|t| !t.is_empty()) else {
            return;
        };
        let key = (thinking.to_string(), signature.unwrap_or_default().to_string());
        if !self.seen_thinking.insert(key) {
            return;
        }
        self.thinking.push(AnthropicContentBlock::Thinking {
            thinking: thinking.to_string(),
            signature: signature.filter(|s| !s.is_empty()).map(str::to_string),
        });
    }

    fn add_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.text.push(AnthropicContentBlock::Text {
            text: text.to_string(),
        });
    }

    fn into_blocks(self) -> Vec<AnthropicContentBlock> {
        let mut blocks = self.thinking;
        blocks.extend(self.text);
        blocks
    }
}
