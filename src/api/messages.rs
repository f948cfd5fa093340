//! Anthropic Messages API endpoint.
//!
//! Requests are translated to the upstream chat-completions protocol and
//! the answer (JSON or SSE) is translated back.

use std::ops::ControlFlow;
use std::sync::Arc;

use async_stream::stream;
use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures::StreamExt;

use crate::api::disconnect::DisconnectStream;
use crate::api::handlers::AppState;
use crate::core::cancel::CancelToken;
use crate::core::error::Result;
use crate::core::logging::{generate_request_id, get_request_id};
use crate::core::metrics::record_token_usage;
use crate::core::middleware::{InitiatorName, ModelName};
use crate::services::initiator::{infer_initiator, ClientHints, Initiator};
use crate::services::upstream::{has_vision_content, UpstreamRequest};
use crate::transformer::anthropic::{
    AnthropicMessagesRequest, AnthropicStreamEvent, AnthropicUsage,
};
use crate::transformer::openai::{ChatCompletionChunk, ChatCompletionResponse};
use crate::transformer::stream::{format_anthropic_event, SseEvent, SseParser, StreamTranslator};
use crate::transformer::{translate_request, translate_response};
use crate::with_request_context;

/// `POST /v1/messages`
pub async fn create_message(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    let request_id = generate_request_id();
    let request: AnthropicMessagesRequest = serde_json::from_slice(&body)?;

    let initiator = Initiator::from_override(&headers).unwrap_or_else(|| {
        infer_initiator(&request.messages, &ClientHints::from_headers(&headers))
    });

    with_request_context!(request_id.clone(), initiator.to_string(), async move {
        tracing::debug!(
            request_id = %request_id,
            model = %request.model,
            stream = request.is_stream(),
            initiator = %initiator,
            "Processing messages request"
        );

        let payload = translate_request(&request);
        let upstream_request = UpstreamRequest {
            initiator,
            vision: has_vision_content(&payload.messages),
        };

        let cancel = CancelToken::new();
        let upstream = state
            .upstream
            .create_chat_completions(&payload, upstream_request, &cancel)
            .await?;

        let mut response = if request.is_stream() {
            stream_response(upstream, cancel, request.model.clone())
        } else {
            json_response(upstream, &request.model).await?
        };

        response
            .extensions_mut()
            .insert(ModelName(request.model.clone()));
        response
            .extensions_mut()
            .insert(InitiatorName(initiator.to_string()));
        Ok(response)
    })
}

async fn json_response(upstream: reqwest::Response, model: &str) -> Result<Response> {
    let upstream: ChatCompletionResponse = upstream.json().await?;
    let translated = translate_response(&upstream)?;

    record_usage(model, &translated.usage);
    tracing::debug!(
        stop_reason = ?translated.stop_reason,
        blocks = translated.content.len(),
        "Translated upstream response"
    );

    Ok(Json(translated).into_response())
}

/// Relay the upstream SSE stream as Anthropic events.
fn stream_response(upstream: reqwest::Response, cancel: CancelToken, model: String) -> Response {
    let request_id = get_request_id();
    let completion = cancel.clone();

    let events = stream! {
        let mut upstream = upstream.bytes_stream();
        let mut parser = SseParser::new();
        let mut translator = StreamTranslator::new();
        let mut final_usage: Option<AnthropicUsage> = None;
        let mut ended = false;

        'read: while let Some(chunk) = upstream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    tracing::warn!(request_id = %request_id, error = %e, "Upstream stream read failed");
                    ended = true;
                    break 'read;
                }
            };

            for event in parser.parse(&chunk) {
                match translate_sse_event(event, &mut translator, &request_id) {
                    ControlFlow::Continue(translated) => {
                        for event in translated {
                            if let AnthropicStreamEvent::MessageDelta { usage, .. } = &event {
                                final_usage = Some(usage.clone());
                            }
                            yield Ok::<_, std::io::Error>(Bytes::from(format_anthropic_event(&event)));
                        }
                    }
                    ControlFlow::Break(()) => {
                        ended = true;
                        break 'read;
                    }
                }
            }
        }

        // The last frame may arrive without its terminating blank line
        if !ended {
            if let Some(event) = parser.finish() {
                if let ControlFlow::Continue(translated) =
                    translate_sse_event(event, &mut translator, &request_id)
                {
                    for event in translated {
                        if let AnthropicStreamEvent::MessageDelta { usage, .. } = &event {
                            final_usage = Some(usage.clone());
                        }
                        yield Ok(Bytes::from(format_anthropic_event(&event)));
                    }
                }
            }
        }

        if !translator.is_finished() {
            tracing::warn!(request_id = %request_id, "Upstream stream ended before a finish reason");
            let error = translator.translate_error();
            yield Ok(Bytes::from(format_anthropic_event(&error)));
        }

        if let Some(usage) = final_usage {
            record_usage(&model, &usage);
        }
        completion.mark_completed();
    };

    let body = Body::from_stream(DisconnectStream::new(Box::pin(events), cancel));

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
        ],
        body,
    )
        .into_response()
}

/// Translate one upstream SSE event. Breaks on `[DONE]` or an unparseable chunk.
fn translate_sse_event(
    event: SseEvent,
    translator: &mut StreamTranslator,
    request_id: &str,
) -> ControlFlow<(), Vec<AnthropicStreamEvent>> {
    let Some(data) = event.data else {
        return ControlFlow::Continue(Vec::new());
    };
    if data.trim() == "[DONE]" {
        return ControlFlow::Break(());
    }

    match serde_json::from_str::<ChatCompletionChunk>(&data) {
        Ok(chunk) => ControlFlow::Continue(translator.translate_chunk(&chunk)),
        Err(e) => {
            tracing::warn!(request_id = %request_id, error = %e, "Unparseable upstream chunk");
            ControlFlow::Break(())
        }
    }
}

fn record_usage(model: &str, usage: &AnthropicUsage) {
    record_token_usage(
        model,
        usage.input_tokens,
        usage.output_tokens,
        usage.cache_read_input_tokens,
    );
}
