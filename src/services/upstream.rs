//! Upstream chat-completions client.
//!
//! Every upstream call goes through the adaptive rate limiter first and
//! reports its outcome back to it, so throttling feedback lives here instead
//! of in each handler.

use std::sync::Arc;

use reqwest::header::RETRY_AFTER;
use serde::Serialize;

use crate::core::cancel::CancelToken;
use crate::core::config::UpstreamConfig;
use crate::core::error::{AppError, Result};
use crate::core::rate_limiter::AdaptiveRateLimiter;
use crate::services::initiator::Initiator;
use crate::transformer::openai::ChatMessage;

const COPILOT_VERSION: &str = "0.26.7";
const API_VERSION: &str = "2025-04-01";

/// Per-call header inputs.
#[derive(Debug, Clone, Copy)]
pub struct UpstreamRequest {
    pub initiator: Initiator,
    /// Sets `copilot-vision-request`
    pub vision: bool,
}

/// True when any message carries an image part.
pub fn has_vision_content(messages: &[ChatMessage]) -> bool {
    messages.iter().any(ChatMessage::has_image)
}

/// Client for the upstream `/chat/completions` endpoint.
pub struct UpstreamClient {
    http_client: reqwest::Client,
    base_url: String,
    token: String,
    vscode_version: String,
    rate_limiter: Arc<AdaptiveRateLimiter>,
}

impl UpstreamClient {
    pub fn new(
        http_client: reqwest::Client,
        base_url: impl Into<String>,
        config: &UpstreamConfig,
        rate_limiter: Arc<AdaptiveRateLimiter>,
    ) -> Self {
        Self {
            http_client,
            base_url: base_url.into(),
            token: config.token.clone(),
            vscode_version: config.vscode_version.clone(),
            rate_limiter,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn rate_limiter(&self) -> &Arc<AdaptiveRateLimiter> {
        &self.rate_limiter
    }

    fn chat_completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    /// Build the upstream request with the editor header set.
    fn build_request<T: Serialize + ?Sized>(
        &self,
        payload: &T,
        request: UpstreamRequest,
    ) -> reqwest::RequestBuilder {
        let mut builder = self
            .http_client
            .post(self.chat_completions_url())
            .header("Authorization", format!("Bearer {}", self.token))
            .header("content-type", "application/json")
            .header("copilot-integration-id", "vscode-chat")
            .header("editor-version", format!("vscode/{}", self.vscode_version))
            .header(
                "editor-plugin-version",
                format!("copilot-chat/{}", COPILOT_VERSION),
            )
            .header("user-agent", format!("GitHubCopilotChat/{}", COPILOT_VERSION))
            .header("openai-intent", "conversation-panel")
            .header("x-github-api-version", API_VERSION)
            .header("x-request-id", uuid::Uuid::new_v4().to_string())
            .header("x-vscode-user-agent-library-version", "electron-fetch")
            .header("X-Initiator", request.initiator.as_str());

        if request.vision {
            builder = builder.header("copilot-vision-request", "true");
        }

        builder.json(payload)
    }

    /// Send a chat-completions request once the rate limiter admits it.
    ///
    /// A 429 pushes the limiter into cooldown before the error is returned.
    /// Any non-success status becomes [`AppError::Upstream`] carrying the
    /// upstream body; the response is otherwise returned unread so callers
    /// can stream it.
    pub async fn create_chat_completions<T: Serialize + ?Sized>(
        &self,
        payload: &T,
        request: UpstreamRequest,
        cancel: &CancelToken,
    ) -> Result<reqwest::Response> {
        let waited_ms = self.rate_limiter.acquire(cancel).await?;

        tracing::debug!(
            initiator = %request.initiator,
            vision = request.vision,
            waited_ms = waited_ms,
            "Sending upstream chat completions request"
        );

        let response = self.build_request(payload, request).send().await?;
        let status = response.status();

        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            self.rate_limiter
                .report_throttled(retry_after.as_deref())
                .await;
        }

        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "(unreadable)".to_string());
            tracing::error!(
                status = status.as_u16(),
                body = %body,
                "Failed to create chat completions"
            );
            tracing::debug!(
                payload = %serde_json::to_string(payload).unwrap_or_default(),
                "Request payload was"
            );
            return Err(AppError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        self.rate_limiter.report_success().await;
        Ok(response)
    }
}
