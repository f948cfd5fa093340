//! Streaming utilities: SSE framing and the chunk → event state machine.

use std::collections::BTreeMap;

use serde_json::json;

use super::anthropic::{
    AnthropicContentBlock, AnthropicDelta, AnthropicErrorBody, AnthropicMessageDelta,
    AnthropicResponse, AnthropicStreamEvent,
};
use super::openai::{ChatCompletionChunk, ChunkDelta};
use super::response::translate_usage;
use super::StopReason;
use crate::core::error_types::{ERROR_TYPE_API, STREAM_ERROR_MESSAGE};
use crate::core::id_sanitizer::sanitize_id;

// ============================================================================
// SSE Parser
// ============================================================================

/// SSE event parsed from stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: Option<String>,
}

/// Incremental SSE parser.
///
/// Bytes are buffered until a blank line completes an event, so multi-byte
/// characters split across network chunks decode correctly.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    /// Bytes of `buffer` already searched for a separator.
    scanned: usize,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes and return every event completed by them.
    pub fn parse(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        // A separator may straddle the previous chunk, so back up by up to 3 bytes.
        while let Some((end, boundary_len)) =
            find_event_boundary(&self.buffer, self.scanned.saturating_sub(3))
        {
            let block: Vec<u8> = self.buffer.drain(..end + boundary_len).take(end).collect();
            self.scanned = 0;
            if let Some(event) = parse_event_block(&String::from_utf8_lossy(&block)) {
                events.push(event);
            }
        }
        self.scanned = self.buffer.len();
        events
    }

    /// Flush a trailing event that was not terminated by a blank line.
    pub fn finish(&mut self) -> Option<SseEvent> {
        let rest = std::mem::take(&mut self.buffer);
        self.scanned = 0;
        parse_event_block(&String::from_utf8_lossy(&rest))
    }
}

/// Position and length of the first blank-line separator (`\n\n` or `\r\n\r\n`)
/// at or after `from`.
fn find_event_boundary(buffer: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i < buffer.len() {
        if buffer[i..].starts_with(b"\n\n") {
            return Some((i, 2));
        }
        if buffer[i..].starts_with(b"\r\n\r\n") {
            return Some((i, 4));
        }
        i += 1;
    }
    None
}

fn parse_event_block(block: &str) -> Option<SseEvent> {
    let mut event = SseEvent::default();

    for line in block.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with(':') {
            continue;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => event.event = Some(value.to_string()),
            "data" => match event.data {
                Some(ref mut data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => event.data = Some(value.to_string()),
            },
            _ => {}
        }
    }

    (event.event.is_some() || event.data.is_some()).then_some(event)
}

// ============================================================================
// SSE Serializer
// ============================================================================

/// Format an SSE event for transmission.
pub fn format_sse_event(event: Option<&str>, data: &str) -> String {
    let mut output = String::new();

    if let Some(event_name) = event {
        output.push_str("event: ");
        output.push_str(event_name);
        output.push('\n');
    }

    for line in data.lines() {
        output.push_str("data: ");
        output.push_str(line);
        output.push('\n');
    }

    output.push('\n');
    output
}

/// Serialize an Anthropic event as an `event:`/`data:` frame.
pub fn format_anthropic_event(event: &AnthropicStreamEvent) -> String {
    let data = serde_json::to_string(event).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Failed to serialize stream event");
        json!({"type": "error", "error": {"type": ERROR_TYPE_API, "message": STREAM_ERROR_MESSAGE}})
            .to_string()
    });
    format_sse_event(Some(event.event_type()), &data)
}

// ============================================================================
// Stream Translator
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockType {
    Text,
    Thinking,
    ToolUse,
}

#[derive(Debug, Clone)]
struct ToolCallState {
    block_index: u32,
    closed: bool,
}

/// Replays upstream chat-completion chunks as Anthropic stream events.
///
/// One instance per streaming response. At most one content block is open
/// at a time; `block_index` advances only when a block closes. Once a chunk
/// with a `finish_reason` (or an error) has been handled, no further events
/// are produced.
#[derive(Debug, Default)]
pub struct StreamTranslator {
    message_start_sent: bool,
    open_block: Option<BlockType>,
    block_index: u32,
    /// Upstream tool-call index → assigned block
    tool_calls: BTreeMap<u32, ToolCallState>,
    finished: bool,
}

impl StreamTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once the terminal events (or an error) have been emitted.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Translate one upstream chunk into zero or more events.
    pub fn translate_chunk(&mut self, chunk: &ChatCompletionChunk) -> Vec<AnthropicStreamEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }
        let Some(choice) = chunk.choices.first() else {
            return events;
        };

        if !self.message_start_sent {
            let mut message = AnthropicResponse::new(chunk.id.clone(), chunk.model.clone());
            message.usage = translate_usage(chunk.usage.as_ref());
            message.usage.output_tokens = 0;
            events.push(AnthropicStreamEvent::MessageStart { message });
            self.message_start_sent = true;
        }

        let delta = &choice.delta;
        self.handle_thinking(delta, &mut events);
        self.handle_text(delta, &mut events);
        self.handle_tool_calls(delta, &mut events);

        if let Some(reason) = choice.finish_reason.as_deref() {
            self.finish(reason, chunk, &mut events);
        }

        events
    }

    /// Terminal event for an upstream stream that broke before finishing.
    ///
    /// Open blocks are left as they are; the client treats the stream as aborted.
    pub fn translate_error(&mut self) -> AnthropicStreamEvent {
        self.finished = true;
        AnthropicStreamEvent::Error {
            error: AnthropicErrorBody {
                error_type: ERROR_TYPE_API.to_string(),
                message: STREAM_ERROR_MESSAGE.to_string(),
            },
        }
    }

    fn handle_thinking(&mut self, delta: &ChunkDelta, events: &mut Vec<AnthropicStreamEvent>) {
        let (thinking, signature) = thinking_delta(delta);
        if thinking.is_none() && signature.is_none() {
            return;
        }

        if self.open_block != Some(BlockType::Thinking) {
            self.close_block(events);
            events.push(AnthropicStreamEvent::ContentBlockStart {
                index: self.block_index,
                content_block: AnthropicContentBlock::Thinking {
                    thinking: String::new(),
                    signature: signature.clone(),
                },
            });
            self.open_block = Some(BlockType::Thinking);
        }

        if let Some(thinking) = thinking {
            events.push(AnthropicStreamEvent::ContentBlockDelta {
                index: self.block_index,
                delta: AnthropicDelta::ThinkingDelta { thinking },
            });
        }
        if let Some(signature) = signature {
            events.push(AnthropicStreamEvent::ContentBlockDelta {
                index: self.block_index,
                delta: AnthropicDelta::SignatureDelta { signature },
            });
        }
    }

    fn handle_text(&mut self, delta: &ChunkDelta, events: &mut Vec<AnthropicStreamEvent>) {
        let Some(text) = delta.content.as_deref().filter(|t| !t.is_empty()) else {
            return;
        };

        if self.open_block != Some(BlockType::Text) {
            self.close_block(events);
            events.push(AnthropicStreamEvent::ContentBlockStart {
                index: self.block_index,
                content_block: AnthropicContentBlock::Text {
                    text: String::new(),
                },
            });
            self.open_block = Some(BlockType::Text);
        }

        events.push(AnthropicStreamEvent::ContentBlockDelta {
            index: self.block_index,
            delta: AnthropicDelta::TextDelta {
                text: text.to_string(),
            },
        });
    }

    fn handle_tool_calls(&mut self, delta: &ChunkDelta, events: &mut Vec<AnthropicStreamEvent>) {
        for call in delta.tool_calls.iter().flatten() {
            let function = call.function.as_ref();
            let name = function
                .and_then(|f| f.name.as_deref())
                .filter(|n| !n.is_empty());

            if let (Some(id), Some(name)) = (call.id.as_deref().filter(|i| !i.is_empty()), name) {
                self.close_block(events);

                let id = sanitize_id(id);
                self.tool_calls.insert(
                    call.index,
                    ToolCallState {
                        block_index: self.block_index,
                        closed: false,
                    },
                );
                events.push(AnthropicStreamEvent::ContentBlockStart {
                    index: self.block_index,
                    content_block: AnthropicContentBlock::ToolUse {
                        id,
                        name: name.to_string(),
                        input: json!({}),
                    },
                });
                self.open_block = Some(BlockType::ToolUse);
            }

            let Some(arguments) = function
                .and_then(|f| f.arguments.as_deref())
                .filter(|a| !a.is_empty())
            else {
                continue;
            };

            match self.tool_calls.get(&call.index) {
                Some(state) => events.push(AnthropicStreamEvent::ContentBlockDelta {
                    index: state.block_index,
                    delta: AnthropicDelta::InputJsonDelta {
                        partial_json: arguments.to_string(),
                    },
                }),
                None => tracing::debug!(
                    tool_index = call.index,
                    "Dropping arguments for unknown tool call"
                ),
            }
        }
    }

    fn finish(
        &mut self,
        reason: &str,
        chunk: &ChatCompletionChunk,
        events: &mut Vec<AnthropicStreamEvent>,
    ) {
        // Tool blocks left open by interleaved calls, in block order
        let current = self.open_block.map(|_| self.block_index);
        let mut dangling: Vec<u32> = self
            .tool_calls
            .values()
            .filter(|state| !state.closed && Some(state.block_index) != current)
            .map(|state| state.block_index)
            .collect();
        dangling.sort_unstable();
        for index in dangling {
            events.push(AnthropicStreamEvent::ContentBlockStop { index });
        }
        for state in self.tool_calls.values_mut() {
            state.closed = true;
        }

        if self.open_block.take().is_some() {
            events.push(AnthropicStreamEvent::ContentBlockStop {
                index: self.block_index,
            });
        }

        events.push(AnthropicStreamEvent::MessageDelta {
            delta: AnthropicMessageDelta {
                stop_reason: Some(StopReason::from_finish_reason(reason)),
                stop_sequence: None,
            },
            usage: translate_usage(chunk.usage.as_ref()),
        });
        events.push(AnthropicStreamEvent::MessageStop);
        self.finished = true;
    }

    /// Close the open block, if any, and advance the block index.
    fn close_block(&mut self, events: &mut Vec<AnthropicStreamEvent>) {
        if self.open_block.take().is_none() {
            return;
        }
        events.push(AnthropicStreamEvent::ContentBlockStop {
            index: self.block_index,
        });
        for state in self.tool_calls.values_mut() {
            if state.block_index == self.block_index {
                state.closed = true;
            }
        }
        self.block_index += 1;
    }
}

/// Reasoning text and signature from whichever delta fields carry them.
///
/// Text is concatenated in the order `thinking`, `reasoning_content`,
/// `reasoning`, then each `reasoning_details` entry.
fn thinking_delta(delta: &ChunkDelta) -> (Option<String>, Option<String>) {
    let mut parts: Vec<&str> = Vec::new();
    let mut signature = delta
        .thinking_signature
        .as_deref()
        .or(delta.reasoning_signature.as_deref())
        .or(delta.signature.as_deref())
        .filter(|s| !s.is_empty());

    for text in [
        delta.thinking.as_deref(),
        delta.reasoning_content.as_deref(),
        delta.reasoning.as_deref(),
    ]
    .into_iter()
    .flatten()
    {
        if !text.is_empty() {
            parts.push(text);
        }
    }

    for detail in delta.reasoning_details.iter().flatten() {
        if let Some(text) = detail.reasoning_text().filter(|t| !t.is_empty()) {
            parts.push(text);
        }
        if signature.is_none() {
            signature = detail.signature.as_deref().filter(|s| !s.is_empty());
        }
    }

    let thinking = (!parts.is_empty()).then(|| parts.concat());
    (thinking, signature.map(str::to_string))
}
