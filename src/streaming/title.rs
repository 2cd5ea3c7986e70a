// ABOUTME: Short titles for discussions that were never named
// ABOUTME: Asks the provider for a title and falls back to the first user message
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Threadline Contributors

use std::time::Duration;

use futures_util::StreamExt;
use tracing::{debug, warn};

use crate::constants::titles;
use crate::errors::{AppError, AppResult};
use crate::llm::{ChatMessage, ChatRequest, LlmProvider};
use crate::models::MessageRole;

/// Labels models like to put in front of the answer
const LABEL_PREFIXES: &[&str] = &[
    "Title:", "title:", "Subject:", "subject:", "Topic:", "topic:", "タイトル:", "題名:", "件名:",
];

/// Keep at most `max` characters, marking a cut with `...`
fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_owned();
    }
    let mut cut: String = text.chars().take(max.saturating_sub(3)).collect();
    cut.push_str("...");
    cut
}

/// `Role: content` lines, stopping once `PREVIEW_CHARS` would be exceeded
///
/// The first line is always kept, cut down if it alone is too long.
fn conversation_preview(turns: &[ChatMessage]) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut used = 0;
    for turn in turns.iter().filter(|t| t.role != MessageRole::System) {
        let label = if turn.role == MessageRole::User {
            "User"
        } else {
            "Assistant"
        };
        let line = format!("{label}: {}", turn.content);
        let length = line.chars().count();
        if used + length > titles::PREVIEW_CHARS {
            if lines.is_empty() {
                lines.push(truncate_chars(&line, titles::PREVIEW_CHARS));
            }
            break;
        }
        used += length + 1;
        lines.push(line);
    }
    lines.join("\n")
}

/// Request asking `model` to name the conversation in `turns`
#[must_use]
pub fn title_request(turns: &[ChatMessage], model: &str) -> ChatRequest {
    let prompt = format!(
        "Generate a concise and descriptive title for the following conversation.\n\n\
         Conversation:\n{}\n\n\
         Requirements:\n\
         - At most {} characters\n\
         - Use the language of the conversation\n\
         - No prefix such as \"Title:\"\n\
         - Output only the title\n\n\
         Title:",
        conversation_preview(turns),
        titles::MAX_GENERATED_TITLE_CHARS,
    );
    ChatRequest::new(vec![ChatMessage::user(prompt)])
        .with_model(model)
        .with_max_tokens(titles::MAX_TOKENS)
        .with_streaming()
}

/// Turn a provider answer into a title, or `None` if nothing usable remains
#[must_use]
pub fn clean_title(raw: &str) -> Option<String> {
    let mut title = raw.trim();
    for prefix in LABEL_PREFIXES {
        if let Some(rest) = title.strip_prefix(prefix) {
            title = rest.trim();
        }
    }
    for quote in ['"', '\''] {
        if title.len() >= 2 && title.starts_with(quote) && title.ends_with(quote) {
            title = title[1..title.len() - 1].trim();
        }
    }
    // Only the first line; models sometimes explain themselves afterwards
    let title = title.lines().next().unwrap_or_default().trim();
    if title.chars().count() < titles::MIN_GENERATED_TITLE_CHARS {
        return None;
    }
    Some(truncate_chars(title, titles::MAX_GENERATED_TITLE_CHARS))
}

/// Title taken from the first non-blank user turn
#[must_use]
pub fn fallback_title(turns: &[ChatMessage]) -> Option<String> {
    turns
        .iter()
        .filter(|t| t.role == MessageRole::User)
        .map(|t| t.content.trim())
        .find(|content| !content.is_empty())
        .map(|content| truncate_chars(content, titles::MAX_GENERATED_TITLE_CHARS))
}

async fn ask_provider(provider: &dyn LlmProvider, request: &ChatRequest) -> AppResult<String> {
    let mut stream = provider.complete_stream(request).await?;
    let mut answer = String::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        answer.push_str(&chunk.delta);
        if chunk.is_final {
            break;
        }
    }
    Ok(answer)
}

/// Title for the conversation in `turns`
///
/// The provider is asked first. A failure, a timeout or an unusable answer
/// falls back to the first user message. `None` only when neither yields text.
pub async fn generate_title(
    provider: &dyn LlmProvider,
    model: &str,
    turns: &[ChatMessage],
) -> Option<String> {
    let request = title_request(turns, model);
    let answer = tokio::time::timeout(
        Duration::from_secs(titles::TIMEOUT_SECS),
        ask_provider(provider, &request),
    )
    .await
    .unwrap_or_else(|_| Err(AppError::timeout("Title generation timed out")));

    match answer {
        Ok(raw) => {
            if let Some(title) = clean_title(&raw) {
                return Some(title);
            }
            debug!(answer = %raw, "Provider answer is not a usable title");
        }
        Err(e) => warn!(error = %e, "Title generation failed, using first message"),
    }
    fallback_title(turns)
}
