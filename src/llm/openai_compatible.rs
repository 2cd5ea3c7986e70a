// ABOUTME: Streaming provider for any OpenAI-compatible chat completions endpoint
// ABOUTME: Works with Ollama, vLLM, LocalAI and hosted services speaking the same API
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Threadline Contributors

//! # `OpenAI`-Compatible Provider
//!
//! Configuration comes from:
//! - `LOCAL_LLM_BASE_URL`: base URL (default <http://localhost:11434/v1>, Ollama)
//! - `LOCAL_LLM_MODEL`: default model (default `qwen2.5:14b-instruct`)
//! - `LOCAL_LLM_API_KEY`: bearer token, optional for local servers

use std::env;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::sse_parser::{
    create_sse_stream, is_retryable_request_error, is_retryable_status, RetryConfig,
};
use super::{ChatMessage, ChatRequest, ChatStream, LlmProvider, StreamChunk, TokenUsage};
use crate::errors::{AppError, AppResult};

const LOCAL_LLM_BASE_URL_ENV: &str = "LOCAL_LLM_BASE_URL";
const LOCAL_LLM_MODEL_ENV: &str = "LOCAL_LLM_MODEL";
const LOCAL_LLM_API_KEY_ENV: &str = "LOCAL_LLM_API_KEY";

const DEFAULT_BASE_URL: &str = "http://localhost:11434/v1";
const DEFAULT_MODEL: &str = "qwen2.5:14b-instruct";

const CONNECT_TIMEOUT_SECS: u64 = 30;
/// Longest silence between two reads of a response body
///
/// This bounds a stalled connection, not the length of a generation. Overall
/// limits come from the caller's deadline.
const READ_IDLE_TIMEOUT_SECS: u64 = 300;
const HEALTH_CHECK_TIMEOUT_SECS: u64 = 10;

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAiMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Serialize)]
struct OpenAiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

impl<'a> From<&'a ChatMessage> for OpenAiMessage<'a> {
    fn from(message: &'a ChatMessage) -> Self {
        Self {
            role: message.role.as_str(),
            content: &message.content,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAiStreamChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChoice {
    #[serde(default)]
    delta: OpenAiDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAiDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

impl From<OpenAiUsage> for TokenUsage {
    fn from(usage: OpenAiUsage) -> Self {
        Self {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorResponse {
    error: OpenAiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorDetail {
    message: String,
    #[serde(rename = "type")]
    error_type: Option<String>,
}

/// Convert one `data:` payload into a chunk; unparseable payloads are skipped
fn parse_stream_payload(json: &str) -> Option<AppResult<StreamChunk>> {
    let chunk = match serde_json::from_str::<OpenAiStreamChunk>(json) {
        Ok(chunk) => chunk,
        Err(e) => {
            warn!(error = %e, "Skipping unparseable stream chunk");
            return None;
        }
    };
    let (delta, finish_reason) = chunk
        .choices
        .into_iter()
        .next()
        .map(|choice| (choice.delta.content.unwrap_or_default(), choice.finish_reason))
        .unwrap_or_default();
    Some(Ok(StreamChunk {
        delta,
        is_final: false,
        finish_reason,
        usage: chunk.usage.map(TokenUsage::from),
    }))
}

// ============================================================================
// Provider configuration
// ============================================================================

/// Endpoint settings for the `OpenAI`-compatible provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenAiCompatibleConfig {
    /// Base URL including the API version segment
    pub base_url: String,
    /// Bearer token, if the endpoint needs one
    pub api_key: Option<String>,
    /// Model used when a request names none
    pub default_model: String,
    /// Name recorded in generation details
    pub provider_name: String,
}

impl Default for OpenAiCompatibleConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            api_key: None,
            default_model: DEFAULT_MODEL.to_owned(),
            provider_name: "ollama".to_owned(),
        }
    }
}

impl OpenAiCompatibleConfig {
    /// Read `LOCAL_LLM_*` variables, falling back to a local Ollama
    #[must_use]
    pub fn from_env() -> Self {
        let base_url =
            env::var(LOCAL_LLM_BASE_URL_ENV).unwrap_or_else(|_| DEFAULT_BASE_URL.to_owned());
        let default_model =
            env::var(LOCAL_LLM_MODEL_ENV).unwrap_or_else(|_| DEFAULT_MODEL.to_owned());
        let api_key = env::var(LOCAL_LLM_API_KEY_ENV)
            .ok()
            .filter(|k| !k.is_empty());
        let provider_name = Self::detect_provider(&base_url).to_owned();
        Self {
            base_url,
            api_key,
            default_model,
            provider_name,
        }
    }

    /// Guess the server flavour from its conventional port
    fn detect_provider(base_url: &str) -> &'static str {
        if base_url.contains(":11434") {
            "ollama"
        } else if base_url.contains(":8000") {
            "vllm"
        } else if base_url.contains(":8080") {
            "localai"
        } else {
            "openai-compatible"
        }
    }
}

// ============================================================================
// Provider
// ============================================================================

/// Streaming client for an `OpenAI`-compatible endpoint
pub struct OpenAiCompatibleProvider {
    client: Client,
    config: OpenAiCompatibleConfig,
    retry: RetryConfig,
}

impl OpenAiCompatibleProvider {
    /// Create a provider
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built
    pub fn new(config: OpenAiCompatibleConfig) -> AppResult<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .read_timeout(Duration::from_secs(READ_IDLE_TIMEOUT_SECS))
            .build()
            .map_err(|e| AppError::config(format!("Failed to create HTTP client: {e}")))?;
        info!(
            provider = %config.provider_name,
            base_url = %config.base_url,
            model = %config.default_model,
            "Generation provider configured"
        );
        Ok(Self {
            client,
            config,
            retry: RetryConfig::default(),
        })
    }

    /// Create a provider from `LOCAL_LLM_*` variables
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built
    pub fn from_env() -> AppResult<Self> {
        Self::new(OpenAiCompatibleConfig::from_env())
    }

    /// Replace the retry policy for opening streams
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn api_url(&self, endpoint: &str) -> String {
        format!("{}/{endpoint}", self.config.base_url.trim_end_matches('/'))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    fn error_from_response(status: reqwest::StatusCode, body: &str) -> AppError {
        let detail = serde_json::from_str::<OpenAiErrorResponse>(body).map_or_else(
            |_| body.chars().take(200).collect::<String>(),
            |parsed| {
                let kind = parsed.error.error_type.unwrap_or_else(|| "error".to_owned());
                format!("{kind}: {}", parsed.error.message)
            },
        );
        match status.as_u16() {
            404 => AppError::provider(format!("Model or endpoint not found: {detail}")),
            502..=504 => AppError::provider(format!(
                "Generation server is not responding ({status}): {detail}"
            )),
            _ => AppError::provider(format!("API error ({status}): {detail}")),
        }
    }

    /// POST with retries on connection failures and overload statuses
    async fn send_with_retry(&self, body: &OpenAiRequest<'_>) -> AppResult<Response> {
        let url = self.api_url("chat/completions");
        let mut attempt = 0;
        loop {
            let result = self
                .authorize(self.client.post(&url).json(body))
                .send()
                .await;
            match result {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response)
                    if is_retryable_status(response.status().as_u16())
                        && attempt < self.retry.max_retries =>
                {
                    warn!(status = %response.status(), attempt, "Provider overloaded, retrying");
                }
                Ok(response) => {
                    let status = response.status();
                    let text = response.text().await.unwrap_or_default();
                    return Err(Self::error_from_response(status, &text));
                }
                Err(e) if is_retryable_request_error(&e) && attempt < self.retry.max_retries => {
                    warn!(error = %e, attempt, "Provider request failed, retrying");
                }
                Err(e) if e.is_connect() => {
                    return Err(AppError::provider(format!(
                        "Cannot connect to {} at {}",
                        self.config.provider_name, self.config.base_url
                    ))
                    .with_source(e));
                }
                Err(e) => return Err(AppError::from(e)),
            }
            tokio::time::sleep(self.retry.delay_for_attempt(attempt)).await;
            attempt += 1;
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.config.provider_name
    }

    fn default_model(&self) -> &str {
        &self.config.default_model
    }

    #[instrument(skip_all, fields(provider = %self.config.provider_name, messages = request.messages.len()))]
    async fn complete_stream(&self, request: &ChatRequest) -> AppResult<ChatStream> {
        let body = OpenAiRequest {
            model: request
                .model
                .as_deref()
                .unwrap_or(&self.config.default_model),
            messages: request.messages.iter().map(OpenAiMessage::from).collect(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: true,
            stream_options: Some(StreamOptions {
                include_usage: true,
            }),
        };
        debug!(model = body.model, "Opening completion stream");

        let response = self.send_with_retry(&body).await?;
        Ok(create_sse_stream(
            response.bytes_stream(),
            parse_stream_payload,
            "openai-compatible",
        ))
    }

    async fn health_check(&self) -> AppResult<bool> {
        let response = self
            .authorize(self.client.get(self.api_url("models")))
            .timeout(Duration::from_secs(HEALTH_CHECK_TIMEOUT_SECS))
            .send()
            .await?;
        Ok(response.status().is_success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_with_usage_and_no_choices_is_kept() {
        let chunk = parse_stream_payload(
            r#"{"choices":[],"usage":{"prompt_tokens":3,"completion_tokens":2,"total_tokens":5}}"#,
        )
        .and_then(Result::ok);
        assert_eq!(chunk.as_ref().map(|c| c.delta.as_str()), Some(""));
        assert_eq!(chunk.and_then(|c| c.usage).map(|u| u.total_tokens), Some(5));
    }

    #[test]
    fn payload_delta_and_finish_reason() {
        let chunk = parse_stream_payload(
            r#"{"choices":[{"delta":{"content":"Hi"},"finish_reason":"stop"}]}"#,
        )
        .and_then(Result::ok);
        assert_eq!(chunk.as_ref().map(|c| c.delta.as_str()), Some("Hi"));
        assert_eq!(
            chunk.and_then(|c| c.finish_reason).as_deref(),
            Some("stop")
        );
        assert!(parse_stream_payload("not json").is_none());
    }

    #[test]
    fn provider_detected_from_port() {
        assert_eq!(
            OpenAiCompatibleConfig::detect_provider("http://localhost:8000/v1"),
            "vllm"
        );
        assert_eq!(
            OpenAiCompatibleConfig::detect_provider("https://api.example.com/v1"),
            "openai-compatible"
        );
    }
}
