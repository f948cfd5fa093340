//! OpenAI-compatible chat completions endpoint.
//!
//! The payload is forwarded to the upstream untouched; only the initiator and
//! vision headers are derived from it.

use std::sync::Arc;

use async_stream::stream;
use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::Value;

use crate::api::disconnect::DisconnectStream;
use crate::api::handlers::AppState;
use crate::core::cancel::CancelToken;
use crate::core::error::Result;
use crate::core::logging::{generate_request_id, get_request_id};
use crate::core::metrics::record_token_usage;
use crate::core::middleware::{InitiatorName, ModelName};
use crate::services::initiator::{infer_initiator, ClientHints, Initiator};
use crate::services::upstream::{has_vision_content, UpstreamRequest};
use crate::transformer::openai::{ChatMessage, ChatUsage};
use crate::transformer::response::translate_usage;
use crate::with_request_context;

/// The parts of a chat-completions payload the gateway inspects.
#[derive(Debug, Default, Deserialize)]
struct PassthroughRequest {
    #[serde(default)]
    model: String,
    #[serde(default)]
    stream: Option<bool>,
    #[serde(default)]
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct UsageEnvelope {
    #[serde(default)]
    usage: Option<ChatUsage>,
}

/// `POST /v1/chat/completions` and `POST /chat/completions`
pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    let request_id = generate_request_id();
    let payload: Value = serde_json::from_slice(&body)?;
    let request: PassthroughRequest = serde_json::from_value(payload.clone())?;

    let initiator = Initiator::from_override(&headers).unwrap_or_else(|| {
        infer_initiator(&request.messages, &ClientHints::from_headers(&headers))
    });

    with_request_context!(request_id.clone(), initiator.to_string(), async move {
        let is_stream = request.stream.unwrap_or(false);
        tracing::debug!(
            request_id = %request_id,
            model = %request.model,
            stream = is_stream,
            initiator = %initiator,
            "Processing chat completions request"
        );

        let upstream_request = UpstreamRequest {
            initiator,
            vision: has_vision_content(&request.messages),
        };

        let cancel = CancelToken::new();
        let upstream = state
            .upstream
            .create_chat_completions(&payload, upstream_request, &cancel)
            .await?;

        let mut response = if is_stream {
            relay_stream(upstream, cancel)
        } else {
            relay_json(upstream, &request.model).await?
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

async fn relay_json(upstream: reqwest::Response, model: &str) -> Result<Response> {
    let content_type = upstream
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| HeaderValue::from_bytes(value.as_bytes()).ok())
        .unwrap_or_else(|| HeaderValue::from_static("application/json"));
    let body = upstream.bytes().await?;

    if let Ok(UsageEnvelope { usage: Some(usage) }) = serde_json::from_slice(&body) {
        let usage = translate_usage(Some(&usage));
        record_token_usage(
            model,
            usage.input_tokens,
            usage.output_tokens,
            usage.cache_read_input_tokens,
        );
    }

    Ok((StatusCode::OK, [(header::CONTENT_TYPE, content_type)], body).into_response())
}

/// Forward the upstream SSE bytes unchanged.
fn relay_stream(upstream: reqwest::Response, cancel: CancelToken) -> Response {
    let request_id = get_request_id();
    let completion = cancel.clone();

    let bytes = stream! {
        let mut upstream = upstream.bytes_stream();
        while let Some(chunk) = upstream.next().await {
            match chunk {
                Ok(chunk) => yield Ok(chunk),
                Err(e) => {
                    tracing::warn!(request_id = %request_id, error = %e, "Upstream stream read failed");
                    yield Err(std::io::Error::new(std::io::ErrorKind::Other, e));
                    break;
                }
            }
        }
        completion.mark_completed();
    };

    let body = Body::from_stream(DisconnectStream::new(Box::pin(bytes), cancel));

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
