// ABOUTME: Events delivered to the caller of a streaming interaction
// ABOUTME: Text deltas followed by exactly one terminal event
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Threadline Contributors

use serde::Serialize;

use crate::errors::ErrorCode;
use crate::models::{GenerationDetail, Message};

/// One event of an interaction stream
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Generated text, in provider order
    Chunk {
        /// Text delta
        delta: String,
    },
    /// Reply persisted
    Completed {
        /// User message persisted with the reply, when the request carried one
        user_message: Option<Message>,
        /// Assistant message
        message: Message,
        /// Its generation detail
        detail: GenerationDetail,
    },
    /// Provider, deadline or store failure; nothing was persisted
    Failed {
        /// Error classification
        code: ErrorCode,
        /// Human-readable description
        message: String,
    },
    /// Cancelled by the caller; nothing was persisted
    Aborted {
        /// Why the interaction stopped
        reason: String,
    },
}

impl StreamEvent {
    /// Whether this event ends the stream
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Chunk { .. })
    }

    /// Delta text for chunk events
    #[must_use]
    pub fn delta(&self) -> Option<&str> {
        match self {
            Self::Chunk { delta } => Some(delta),
            _ => None,
        }
    }
}
