// ABOUTME: Generation provider contract used by the interaction engine
// ABOUTME: Chat request/stream types plus the OpenAI-compatible HTTP implementation
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Threadline Contributors

//! # Generation Providers
//!
//! A provider turns an ordered list of chat messages into a lazy stream of
//! text chunks. Dropping the stream must release the provider connection;
//! that is the only cancellation hook the engine relies on.
//!
//! ```rust,no_run
//! use futures_util::StreamExt;
//! use threadline::llm::{ChatMessage, ChatRequest, LlmProvider, OpenAiCompatibleProvider};
//!
//! # async fn example() -> Result<(), threadline::errors::AppError> {
//! let provider = OpenAiCompatibleProvider::from_env()?;
//! let request = ChatRequest::new(vec![ChatMessage::user("Hello")]).with_streaming();
//! let mut stream = provider.complete_stream(&request).await?;
//! while let Some(chunk) = stream.next().await {
//!     print!("{}", chunk?.delta);
//! }
//! # Ok(())
//! # }
//! ```

mod openai_compatible;
pub mod sse_parser;

pub use openai_compatible::{OpenAiCompatibleConfig, OpenAiCompatibleProvider};

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use serde::{Deserialize, Serialize};

use crate::errors::AppResult;
use crate::models::{Message, MessageRole};

/// A single message in a provider request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role of the author
    pub role: MessageRole,
    /// Text content
    pub content: String,
}

impl ChatMessage {
    /// Create a chat message
    #[must_use]
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Create a system message
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    /// Create a user message
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    /// Create an assistant message
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }
}

impl From<&Message> for ChatMessage {
    fn from(message: &Message) -> Self {
        Self::new(message.role, message.content.clone())
    }
}

/// Configuration for a chat completion request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Conversation messages, oldest first
    pub messages: Vec<ChatMessage>,
    /// Model identifier; the provider default when `None`
    pub model: Option<String>,
    /// Sampling temperature
    pub temperature: Option<f32>,
    /// Maximum tokens to generate
    pub max_tokens: Option<u32>,
    /// Whether to stream the response
    pub stream: bool,
}

impl ChatRequest {
    /// Create a request for `messages`
    #[must_use]
    pub const fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            model: None,
            temperature: None,
            max_tokens: None,
            stream: false,
        }
    }

    /// Set the model
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set the temperature
    #[must_use]
    pub const fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the maximum tokens
    #[must_use]
    pub const fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Enable streaming
    #[must_use]
    pub const fn with_streaming(mut self) -> Self {
        self.stream = true;
        self
    }
}

/// Token usage reported by a provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens in the prompt
    pub prompt_tokens: u32,
    /// Tokens in the completion
    pub completion_tokens: u32,
    /// Total tokens
    pub total_tokens: u32,
}

/// One piece of a streaming response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Text delta; may be empty on metadata-only chunks
    pub delta: String,
    /// Set on the end-of-stream marker
    pub is_final: bool,
    /// Why generation stopped, when the provider says so
    pub finish_reason: Option<String>,
    /// Usage, usually on the last chunk
    pub usage: Option<TokenUsage>,
}

impl StreamChunk {
    /// Chunk carrying only text
    #[must_use]
    pub fn text(delta: impl Into<String>) -> Self {
        Self {
            delta: delta.into(),
            ..Self::default()
        }
    }

    /// End-of-stream marker
    #[must_use]
    pub fn done() -> Self {
        Self {
            is_final: true,
            ..Self::default()
        }
    }
}

/// Stream of chunks returned by a provider
pub type ChatStream = Pin<Box<dyn Stream<Item = AppResult<StreamChunk>> + Send>>;

/// Contract for generation providers
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Short identifier recorded in generation details
    fn name(&self) -> &str;

    /// Model used when the request does not name one
    fn default_model(&self) -> &str;

    /// Start a streaming completion
    ///
    /// The returned stream ends after the final chunk or an error. Dropping it
    /// aborts the request.
    async fn complete_stream(&self, request: &ChatRequest) -> AppResult<ChatStream>;

    /// Whether the provider endpoint is reachable
    async fn health_check(&self) -> AppResult<bool>;
}
