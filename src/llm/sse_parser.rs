// ABOUTME: Line-buffering Server-Sent Events parser for streaming completion responses
// ABOUTME: Copes with partial lines across network reads and several events in one read
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Threadline Contributors

//! # SSE Stream Parser
//!
//! Network reads do not line up with SSE event boundaries: one read may carry
//! several `data:` lines, and one JSON payload may be split across reads.
//! [`SseLineBuffer`] keeps the trailing partial line until its newline arrives.
//! [`create_sse_stream`] wraps a byte stream and hands each complete payload
//! to a provider-specific parser.

use std::collections::VecDeque;
use std::mem;
use std::pin::Pin;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use futures_util::stream::unfold;
use futures_util::{future, Stream, StreamExt};

use super::{ChatStream, StreamChunk};
use crate::errors::{AppError, AppResult};

/// A parsed SSE event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// A `data:` payload with the prefix stripped
    Data(String),
    /// The `[DONE]` terminator
    Done,
}

/// Buffers bytes until complete lines are available
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    buffer: String,
    /// Bytes of an incomplete UTF-8 sequence at the end of the last read
    carry: Vec<u8>,
}

impl SseLineBuffer {
    /// Create an empty buffer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one network read and return the events it completed
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.carry.extend_from_slice(bytes);
        let valid_up_to = match std::str::from_utf8(&self.carry) {
            Ok(_) => self.carry.len(),
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(_) => self.carry.len(),
        };
        let rest = self.carry.split_off(valid_up_to);
        let complete = mem::replace(&mut self.carry, rest);
        self.buffer.push_str(&String::from_utf8_lossy(&complete));

        let mut events = Vec::new();
        while let Some(newline) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline).collect();
            if let Some(event) = parse_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Parse whatever is left once the byte stream has ended
    pub fn flush(&mut self) -> Vec<SseEvent> {
        let mut remaining = mem::take(&mut self.buffer);
        remaining.push_str(&String::from_utf8_lossy(&mem::take(&mut self.carry)));
        parse_line(&remaining).into_iter().collect()
    }
}

fn parse_line(line: &str) -> Option<SseEvent> {
    let trimmed = line.trim();
    // Blank lines separate events; `event:`, `id:`, `retry:` and comments are ignored
    let data = trimmed.strip_prefix("data:")?.trim_start();
    if data == "[DONE]" {
        return Some(SseEvent::Done);
    }
    (!data.is_empty()).then(|| SseEvent::Data(data.to_owned()))
}

struct SseStreamState<F> {
    parser: SseLineBuffer,
    pending: VecDeque<AppResult<StreamChunk>>,
    parse_data: F,
    provider_name: &'static str,
    ended: bool,
}

impl<F> SseStreamState<F>
where
    F: Fn(&str) -> Option<AppResult<StreamChunk>>,
{
    fn push_events(&mut self, events: Vec<SseEvent>) {
        for event in events {
            match event {
                SseEvent::Data(json) => {
                    if let Some(result) = (self.parse_data)(&json) {
                        self.pending.push_back(result);
                    }
                }
                SseEvent::Done => {
                    self.pending.push_back(Ok(StreamChunk::done()));
                    self.ended = true;
                    // Anything after [DONE] is ignored
                    break;
                }
            }
        }
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>;

/// Turn a raw HTTP body stream into a chunk stream
///
/// `parse_data` converts one `data:` payload into a chunk, or returns `None`
/// to skip it. Chunks with no text, no usage and no finish reason are dropped.
/// The stream ends after `[DONE]`, a read error, or the end of the body.
pub fn create_sse_stream<S, F>(byte_stream: S, parse_data: F, provider_name: &'static str) -> ChatStream
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
    F: Fn(&str) -> Option<AppResult<StreamChunk>> + Send + 'static,
{
    let body: ByteStream = Box::pin(byte_stream);
    let state = SseStreamState {
        parser: SseLineBuffer::new(),
        pending: VecDeque::new(),
        parse_data,
        provider_name,
        ended: false,
    };

    let stream = unfold((body, state), |(mut body, mut state)| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, (body, state)));
            }
            if state.ended {
                return None;
            }
            match body.next().await {
                Some(Ok(bytes)) => {
                    let events = state.parser.feed(&bytes);
                    state.push_events(events);
                }
                Some(Err(e)) => {
                    state.ended = true;
                    let error = AppError::provider(format!(
                        "{} stream read error: {e}",
                        state.provider_name
                    ));
                    return Some((Err(error), (body, state)));
                }
                None => {
                    let events = state.parser.flush();
                    state.push_events(events);
                    state.ended = true;
                }
            }
        }
    });

    let filtered = stream.filter(|result| {
        future::ready(result.as_ref().map_or(true, |chunk| {
            !chunk.delta.is_empty()
                || chunk.is_final
                || chunk.usage.is_some()
                || chunk.finish_reason.is_some()
        }))
    });

    Box::pin(filtered)
}

// ============================================================================
// Retry Configuration
// ============================================================================

/// Retry policy for opening a provider stream
///
/// Only the initial request is retried. Once bytes flow the caller may have
/// consumed output, so a broken stream is reported instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Retries after the first attempt (0 = none)
    pub max_retries: u32,
    /// Delay before the first retry in milliseconds
    pub initial_delay_ms: u64,
    /// Backoff ceiling in milliseconds
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 500,
            max_delay_ms: 5_000,
        }
    }
}

impl RetryConfig {
    /// No retries
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            initial_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    /// `min(initial * 2^attempt, max)` plus up to 99ms of jitter
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self
            .initial_delay_ms
            .saturating_mul(1_u64.checked_shl(attempt).unwrap_or(u64::MAX));
        let jitter = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| u64::from(d.subsec_millis()))
            % 100;
        Duration::from_millis(base.min(self.max_delay_ms) + jitter)
    }
}

/// Status codes worth retrying: rate limiting and upstream overload
#[must_use]
pub const fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 502 | 503)
}

/// Connection and timeout failures are worth retrying
#[must_use]
pub fn is_retryable_request_error(error: &reqwest::Error) -> bool {
    error.is_connect() || error.is_timeout()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_partial_utf8_until_complete() {
        let mut buffer = SseLineBuffer::new();
        let line = "data: {\"c\":\"é\"}\n".as_bytes();
        let split = line.iter().position(|b| *b == 0xC3).map_or(0, |i| i + 1);
        assert!(buffer.feed(&line[..split]).is_empty());
        let events = buffer.feed(&line[split..]);
        assert_eq!(events, vec![SseEvent::Data("{\"c\":\"é\"}".to_owned())]);
    }

    #[test]
    fn backoff_is_capped() {
        let retry = RetryConfig {
            max_retries: 5,
            initial_delay_ms: 100,
            max_delay_ms: 300,
        };
        assert!(retry.delay_for_attempt(0) >= Duration::from_millis(100));
        assert!(retry.delay_for_attempt(40) < Duration::from_millis(400));
    }
}
