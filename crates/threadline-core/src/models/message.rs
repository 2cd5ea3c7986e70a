// ABOUTME: Message, role and generation detail models
// ABOUTME: Generation details record model, token usage, cost and latency per assistant reply
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Threadline Contributors

use crate::errors::AppError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Author of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System instruction message
    System,
    /// User input message
    User,
    /// Assistant response message
    Assistant,
}

impl MessageRole {
    /// Convert to string representation for storage and API calls
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageRole {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Self::System),
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(AppError::invalid_input(format!(
                "Unknown message role '{other}'"
            ))),
        }
    }
}

/// A node of a discussion tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Message identifier
    pub id: String,
    /// Discussion the message belongs to
    pub discussion_id: String,
    /// Parent message, `None` only for the root
    pub parent_id: Option<String>,
    /// Author
    pub role: MessageRole,
    /// Text content
    pub content: String,
    /// Per-discussion insertion counter, breaks `created_at` ties
    pub seq: i64,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Sort key that orders siblings and picks the latest message
    #[must_use]
    pub fn order_key(&self) -> (DateTime<Utc>, i64) {
        (self.created_at, self.seq)
    }
}

/// Message content to append
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    /// Author
    pub role: MessageRole,
    /// Text content
    pub content: String,
}

impl NewMessage {
    /// Create a message of the given role
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// User message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    /// Assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }
}

/// Stored record of how an assistant message was produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationDetail {
    /// Detail identifier
    pub id: String,
    /// The assistant message this describes
    pub message_id: String,
    /// Model that produced the message
    pub model: String,
    /// Provider that served the model
    pub provider: Option<String>,
    /// Prompt tokens reported by the provider
    pub prompt_tokens: Option<i64>,
    /// Completion tokens reported by the provider
    pub completion_tokens: Option<i64>,
    /// Total tokens reported by the provider
    pub total_tokens: Option<i64>,
    /// Cost computed from the configured model pricing
    pub cost: Option<f64>,
    /// Wall-clock generation time in milliseconds
    pub latency_ms: Option<i64>,
    /// Provider finish reason
    pub finish_reason: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// Generation detail supplied when appending an assistant message
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewGenerationDetail {
    /// Model that produced the message
    pub model: String,
    /// Provider that served the model
    pub provider: Option<String>,
    /// Prompt tokens reported by the provider
    pub prompt_tokens: Option<i64>,
    /// Completion tokens reported by the provider
    pub completion_tokens: Option<i64>,
    /// Total tokens reported by the provider
    pub total_tokens: Option<i64>,
    /// Cost computed from the configured model pricing
    pub cost: Option<f64>,
    /// Wall-clock generation time in milliseconds
    pub latency_ms: Option<i64>,
    /// Provider finish reason
    pub finish_reason: Option<String>,
}

impl NewGenerationDetail {
    /// Detail naming only the model
    pub fn for_model(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    /// Tokens to add to the discussion total
    #[must_use]
    pub fn token_total(&self) -> i64 {
        self.total_tokens.unwrap_or_else(|| {
            self.prompt_tokens.unwrap_or(0) + self.completion_tokens.unwrap_or(0)
        })
    }
}
