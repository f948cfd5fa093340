//! Protocol translation between the Anthropic Messages API and the upstream
//! Chat Completions API.
//!
//! ```text
//! Anthropic request ──[request::translate_request]──▶ Chat Completions payload
//!                                                         │
//!                                                      upstream
//!                                                         │
//! Anthropic response ◀──[response::translate_response]── JSON response
//! Anthropic events   ◀──[stream::StreamTranslator]────── SSE chunks
//! ```
//!
//! Every function here is pure; transport lives in `services` and `api`.

pub mod anthropic;
pub mod openai;
pub mod request;
pub mod response;
pub mod stream;

use serde::{Deserialize, Serialize};

pub use request::translate_request;
pub use response::translate_response;
pub use stream::{SseParser, StreamTranslator};

/// Anthropic stop reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    ToolUse,
    Refusal,
}

impl StopReason {
    /// Map an upstream `finish_reason`; unknown reasons end the turn.
    pub fn from_finish_reason(reason: &str) -> Self {
        match reason {
            "stop" => StopReason::EndTurn,
            "length" => StopReason::MaxTokens,
            "tool_calls" => StopReason::ToolUse,
            "content_filter" => StopReason::Refusal,
            _ => StopReason::EndTurn,
        }
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StopReason::EndTurn => "end_turn",
            StopReason::MaxTokens => "max_tokens",
            StopReason::ToolUse => "tool_use",
            StopReason::Refusal => "refusal",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_reason_mapping() {
        assert_eq!(StopReason::from_finish_reason("stop"), StopReason::EndTurn);
        assert_eq!(
            StopReason::from_finish_reason("length"),
            StopReason::MaxTokens
        );
        assert_eq!(
            StopReason::from_finish_reason("tool_calls"),
            StopReason::ToolUse
        );
        assert_eq!(
            StopReason::from_finish_reason("content_filter"),
            StopReason::Refusal
        );
        assert_eq!(
            StopReason::from_finish_reason("function_call"),
            StopReason::EndTurn
        );
    }

    #[test]
    fn test_stop_reason_serializes_like_display() {
        for reason in [
            StopReason::EndTurn,
            StopReason::MaxTokens,
            StopReason::ToolUse,
            StopReason::Refusal,
        ] {
            assert_eq!(
                serde_json::to_value(reason).unwrap(),
                serde_json::Value::String(reason.to_string())
            );
        }
    }
}
