//! Anthropic request → Chat Completions payload.

use once_cell::sync::Lazy;
use regex::Regex;

use super::anthropic::{
    AnthropicContentBlock, AnthropicContent, AnthropicMessage, AnthropicMessagesRequest,
    AnthropicRole, AnthropicSystem, AnthropicThinking, AnthropicTool, AnthropicToolChoice,
    AnthropicToolResultContent,
};
use super::openai::{
    ChatContent, ChatMessage, ChatRole, ChatTool, ChatToolChoice, ChatCompletionsPayload,
    ContentPart, FunctionDefinition, ImageUrl, ReasoningConfig, ToolCall, ToolChoiceMode,
};
use crate::core::id_sanitizer::sanitize_id;

/// Dated snapshot suffix on Claude model names, e.g. `-20250514`.
static MODEL_DATE_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(claude-.+)-\d{8}$").expect("valid model regex"));

const BLOCK_SEPARATOR: &str = "\n\n";

/// Translate an Anthropic messages request into the upstream payload.
pub fn translate_request(request: &AnthropicMessagesRequest) -> ChatCompletionsPayload {
    ChatCompletionsPayload {
        model: translate_model_name(&request.model),
        messages: translate_messages(&request.messages, request.system.as_ref()),
        max_tokens: Some(request.max_tokens),
        stop: request.stop_sequences.clone(),
        stream: request.stream,
        temperature: request.temperature,
        top_p: request.top_p,
        user: request
            .metadata
            .as_ref()
            .and_then(|metadata| metadata.user_id.clone()),
        tools: request.tools.as_deref().map(translate_tools),
        tool_choice: request.tool_choice.as_ref().and_then(translate_tool_choice),
        thinking: request
            .thinking
            .as_ref()
            .and_then(|thinking| serde_json::to_value(thinking).ok()),
        reasoning: request.thinking.as_ref().and_then(translate_thinking),
    }
}

/// Collapse dated Claude snapshots onto their family name.
pub fn translate_model_name(model: &str) -> String {
    match MODEL_DATE_SUFFIX.captures(model) {
        Some(captures) => captures[1].to_string(),
        None => model.to_string(),
    }
}

fn translate_messages(
    messages: &[AnthropicMessage],
    system: Option<&AnthropicSystem>,
) -> Vec<ChatMessage> {
    let mut out = Vec::with_capacity(messages.len() + 1);

    if let Some(system) = system {
        let text = match system {
            AnthropicSystem::Text(text) => text.clone(),
            AnthropicSystem::Blocks(blocks) => blocks
                .iter()
                .map(|block| block.text.as_str())
                .collect::<Vec<_>>()
                .join(BLOCK_SEPARATOR),
        };
        if !text.is_empty() {
            out.push(ChatMessage::new(ChatRole::System, Some(ChatContent::Text(text))));
        }
    }

    for message in messages {
        match message.role {
            AnthropicRole::User => push_user_message(&mut out, &message.content),
            AnthropicRole::Assistant => push_assistant_message(&mut out, &message.content),
        }
    }

    out
}

fn push_user_message(out: &mut Vec<ChatMessage>, content: &AnthropicContent) {
    let blocks = match content {
        AnthropicContent::Text(text) => {
            out.push(ChatMessage::new(
                ChatRole::User,
                Some(ChatContent::Text(text.clone())),
            ));
            return;
        }
        AnthropicContent::Blocks(blocks) => blocks,
    };

    // Tool results go first: tool_use -> tool_result -> user
    for block in blocks {
        if let AnthropicContentBlock::ToolResult {
            tool_use_id,
            content,
            ..
        } = block
        {
            let mut message = ChatMessage::new(ChatRole::Tool, Some(map_tool_result(content)));
            message.tool_call_id = Some(sanitize_id(tool_use_id));
            out.push(message);
        }
    }

    let others: Vec<&AnthropicContentBlock> = blocks
        .iter()
        .filter(|block| !matches!(block, AnthropicContentBlock::ToolResult { .. }))
        .collect();

    if !others.is_empty() {
        out.push(ChatMessage::new(ChatRole::User, Some(map_blocks(&others))));
    }
}

fn push_assistant_message(out: &mut Vec<ChatMessage>, content: &AnthropicContent) {
    let blocks = match content {
        AnthropicContent::Text(text) => {
            out.push(ChatMessage::new(
                ChatRole::Assistant,
                Some(ChatContent::Text(text.clone())),
            ));
            return;
        }
        AnthropicContent::Blocks(blocks) => blocks,
    };

    let tool_calls: Vec<ToolCall> = blocks
        .iter()
        .filter_map(|block| match block {
            AnthropicContentBlock::ToolUse { id, name, input } => Some(ToolCall::function(
                sanitize_id(id),
                name.clone(),
                input.to_string(),
            )),
            _ => None,
        })
        .collect();

    if tool_calls.is_empty() {
        let refs: Vec<&AnthropicContentBlock> = blocks.iter().collect();
        out.push(ChatMessage::new(ChatRole::Assistant, Some(map_blocks(&refs))));
        return;
    }

    let text = joined_text(blocks.iter());
    let content = (!text.is_empty()).then_some(ChatContent::Text(text));
    let mut message = ChatMessage::new(ChatRole::Assistant, content);
    message.tool_calls = Some(tool_calls);
    out.push(message);
}

fn map_tool_result(content: &AnthropicToolResultContent) -> ChatContent {
    match content {
        AnthropicToolResultContent::Text(text) => ChatContent::Text(text.clone()),
        AnthropicToolResultContent::Blocks(blocks) => {
            let refs: Vec<&AnthropicContentBlock> = blocks.iter().collect();
            map_blocks(&refs)
        }
    }
}

/// Text and thinking joined by blank lines, or typed parts when an image is present.
fn map_blocks(blocks: &[&AnthropicContentBlock]) -> ChatContent {
    let has_image = blocks
        .iter()
        .any(|block| matches!(block, AnthropicContentBlock::Image { .. }));

    if !has_image {
        return ChatContent::Text(joined_text(blocks.iter().copied()));
    }

    let parts = blocks
        .iter()
        .filter_map(|block| match block {
            AnthropicContentBlock::Text { text } => Some(ContentPart::Text { text: text.clone() }),
            AnthropicContentBlock::Thinking { thinking, .. } => Some(ContentPart::Text {
                text: thinking.clone(),
            }),
            AnthropicContentBlock::Image { source } => Some(ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: source.to_url(),
                    detail: None,
                },
            }),
            AnthropicContentBlock::ToolUse { .. }
            | AnthropicContentBlock::ToolResult { .. }
            | AnthropicContentBlock::Other => None,
        })
        .collect();

    ChatContent::Parts(parts)
}

fn joined_text<'a>(blocks: impl Iterator<Item = &'a AnthropicContentBlock>) -> String {
    blocks
        .filter_map(|block| match block {
            AnthropicContentBlock::Text { text } => Some(text.as_str()),
            AnthropicContentBlock::Thinking { thinking, .. } => Some(thinking.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join(BLOCK_SEPARATOR)
}

fn translate_tools(tools: &[AnthropicTool]) -> Vec<ChatTool> {
    tools
        .iter()
        .map(|tool| ChatTool {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: tool.input_schema.clone(),
            },
        })
        .collect()
}

fn translate_tool_choice(choice: &AnthropicToolChoice) -> Option<ChatToolChoice> {
    match choice {
        AnthropicToolChoice::Auto => Some(ChatToolChoice::Mode(ToolChoiceMode::Auto)),
        AnthropicToolChoice::Any => Some(ChatToolChoice::Mode(ToolChoiceMode::Required)),
        AnthropicToolChoice::Tool { name } => name.as_deref().map(ChatToolChoice::named),
        AnthropicToolChoice::None => Some(ChatToolChoice::Mode(ToolChoiceMode::None)),
    }
}

fn translate_thinking(thinking: &AnthropicThinking) -> Option<ReasoningConfig> {
    match thinking {
        AnthropicThinking::Enabled { budget_tokens } => Some(ReasoningConfig {
            reasoning_type: "enabled".to_string(),
            enabled: true,
            budget_tokens: *budget_tokens,
        }),
        AnthropicThinking::Adaptive => Some(ReasoningConfig {
            reasoning_type: "adaptive".to_string(),
            enabled: true,
            budget_tokens: None,
        }),
        AnthropicThinking::Disabled => None,
    }
}
