// ABOUTME: Shared test utilities and setup functions for integration tests
// ABOUTME: In-memory store, owner and discussion fixtures, and a scripted generation provider
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Threadline Contributors
#![allow(
    dead_code,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate,
    clippy::unwrap_used,
    clippy::expect_used
)]
//! Shared test utilities for `threadline`

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use async_trait::async_trait;
use threadline::cache::ResponseCache;
use threadline::config::{CacheConfig, DatabaseConfig, ModelPricing, StreamingConfig};
use threadline::database::{Database, DiscussionManager, NewDiscussion};
use threadline::errors::{AppError, AppResult, ErrorCode};
use threadline::llm::{ChatRequest, ChatStream, LlmProvider, StreamChunk, TokenUsage};
use threadline::models::{Discussion, Message, Owner};
use threadline::streaming::InteractionEngine;

static INIT_LOGGER: Once = Once::new();

/// Initialize quiet logging for tests (call once per test process)
pub fn init_test_logging() {
    INIT_LOGGER.call_once(|| {
        let log_level = match std::env::var("TEST_LOG").as_deref() {
            Ok("TRACE") => tracing::Level::TRACE,
            Ok("DEBUG") => tracing::Level::DEBUG,
            Ok("INFO") => tracing::Level::INFO,
            _ => tracing::Level::WARN,
        };

        tracing_subscriber::fmt()
            .with_max_level(log_level)
            .with_test_writer()
            .init();
    });
}

/// Fresh in-memory store with the schema applied
pub async fn create_test_database() -> Database {
    init_test_logging();
    Database::new(&DatabaseConfig::memory())
        .await
        .expect("in-memory database")
}

/// File-backed store in `dir`, with a pool that allows concurrent connections
pub async fn create_file_database(dir: &tempfile::TempDir) -> Database {
    init_test_logging();
    Database::new(&DatabaseConfig::file(dir.path().join("threadline.db")))
        .await
        .expect("file database")
}

/// Cache without a background sweep, so tests control expiry
pub fn create_test_cache(ttl: Duration) -> ResponseCache {
    ResponseCache::new(CacheConfig {
        max_entries: 1_000,
        ttl,
        cleanup_interval: Duration::from_secs(3600),
        enable_background_cleanup: false,
    })
    .expect("cache")
}

/// Manager over a fresh store with an attached cache
pub async fn create_cached_manager() -> (DiscussionManager, ResponseCache) {
    let db = create_test_database().await;
    let cache = create_test_cache(Duration::from_secs(300));
    (DiscussionManager::new(db).with_cache(cache.clone()), cache)
}

pub async fn create_test_owner(db: &Database, name: &str) -> Owner {
    db.create_owner(name).await.expect("owner")
}

/// Discussion whose root is a user message
pub async fn create_test_discussion(
    manager: &DiscussionManager,
    owner: &Owner,
    first_message: &str,
) -> (Discussion, Message) {
    manager
        .init_structure(NewDiscussion::new(owner.id.clone(), first_message))
        .await
        .expect("discussion")
}

/// Pricing used by engine tests: 1.0 per 1k prompt tokens, 2.0 per 1k completion tokens
///
/// Automatic titles are off so each interaction opens exactly one stream.
pub fn test_streaming_config() -> StreamingConfig {
    StreamingConfig {
        default_deadline: None,
        context_message_limit: 0,
        pricing: ModelPricing {
            prompt_per_1k: 1.0,
            completion_per_1k: 2.0,
        },
        auto_title: false,
    }
}

// ============================================================================
// Scripted provider
// ============================================================================

/// One scripted step of a provider stream
#[derive(Debug, Clone)]
pub enum MockStep {
    /// Emit a text chunk
    Text(&'static str),
    /// Emit a metadata chunk with usage and a finish reason
    Usage(TokenUsage),
    /// Emit an error item
    Fail(&'static str),
    /// Wait before the next step
    Sleep(Duration),
    /// Never produce another item
    Hang,
    /// Emit the end-of-stream marker
    Done,
}

/// Provider that replays a script and records what it was asked
pub struct MockProvider {
    script: Vec<MockStep>,
    open_error: Option<(ErrorCode, &'static str)>,
    released: Arc<AtomicBool>,
    opened: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<ChatRequest>>>,
}

impl MockProvider {
    pub fn new(script: Vec<MockStep>) -> Self {
        Self {
            script,
            open_error: None,
            released: Arc::new(AtomicBool::new(false)),
            opened: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Typical successful reply: two text chunks, usage, done
    pub fn replying(first: &'static str, second: &'static str) -> Self {
        Self::new(vec![
            MockStep::Text(first),
            MockStep::Text(second),
            MockStep::Usage(TokenUsage {
                prompt_tokens: 100,
                completion_tokens: 50,
                total_tokens: 150,
            }),
            MockStep::Done,
        ])
    }

    /// Fail before any stream exists
    pub fn failing_to_open(code: ErrorCode, message: &'static str) -> Self {
        let mut provider = Self::new(Vec::new());
        provider.open_error = Some((code, message));
        provider
    }

    /// Set once the stream handed out has been dropped
    pub fn released_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.released)
    }

    /// Number of streams opened
    pub fn opened_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.opened)
    }

    /// Requests received so far
    pub fn request_log(&self) -> Arc<Mutex<Vec<ChatRequest>>> {
        Arc::clone(&self.requests)
    }
}

/// Flips the flag when the stream owning it is dropped
struct ReleaseOnDrop(Arc<AtomicBool>);

impl Drop for ReleaseOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn default_model(&self) -> &str {
        "mock-model"
    }

    async fn complete_stream(&self, request: &ChatRequest) -> AppResult<ChatStream> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some((code, message)) = self.open_error {
            return Err(AppError::new(code, message));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);

        let script = self.script.clone();
        let release = ReleaseOnDrop(Arc::clone(&self.released));
        Ok(Box::pin(async_stream::stream! {
            let _release = release;
            for step in script {
                match step {
                    MockStep::Text(text) => yield Ok(StreamChunk::text(text)),
                    MockStep::Usage(usage) => yield Ok(StreamChunk {
                        finish_reason: Some("stop".to_owned()),
                        usage: Some(usage),
                        ..StreamChunk::default()
                    }),
                    MockStep::Fail(message) => yield Err(AppError::provider(message)),
                    MockStep::Sleep(duration) => tokio::time::sleep(duration).await,
                    MockStep::Hang => std::future::pending::<()>().await,
                    MockStep::Done => yield Ok(StreamChunk::done()),
                }
            }
        }))
    }

    async fn health_check(&self) -> AppResult<bool> {
        Ok(true)
    }
}

/// Engine over `manager` driven by `provider`
pub fn create_engine(manager: DiscussionManager, provider: MockProvider) -> InteractionEngine {
    InteractionEngine::new(manager, Arc::new(provider), test_streaming_config())
}
