// ABOUTME: Builds the provider prompt from a discussion branch
// ABOUTME: System prompt first, then the most recent branch messages within the configured window
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Threadline Contributors

use crate::llm::ChatMessage;
use crate::models::Message;

/// Assemble the provider messages for a reply
///
/// `path` runs root to parent. `pending_user` is a user turn not yet persisted.
/// A `window` of 0 keeps the whole branch; otherwise only the last `window`
/// turns (including the pending one) are sent. The system prompt is never
/// trimmed.
#[must_use]
pub fn build_context(
    system_prompt: Option<&str>,
    path: &[Message],
    pending_user: Option<&str>,
    window: usize,
) -> Vec<ChatMessage> {
    let mut turns: Vec<ChatMessage> = path.iter().map(ChatMessage::from).collect();
    if let Some(content) = pending_user {
        turns.push(ChatMessage::user(content));
    }
    if window > 0 && turns.len() > window {
        turns.drain(..turns.len() - window);
    }

    let mut messages = Vec::with_capacity(turns.len() + 1);
    if let Some(prompt) = system_prompt.filter(|p| !p.trim().is_empty()) {
        messages.push(ChatMessage::system(prompt));
    }
    messages.extend(turns);
    messages
}
