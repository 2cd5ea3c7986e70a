// ABOUTME: Streaming interaction engine: context load, provider streaming, atomic finalization
// ABOUTME: Cancellation and deadlines persist nothing; a started commit always runs to completion
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Threadline Contributors

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use futures_util::{Stream, StreamExt};
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant as Deadline};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::context::build_context;
use super::events::StreamEvent;
use super::state::{InteractionState, StateGuard};
use super::title::generate_title;
use crate::config::{ModelPricing, StreamingConfig};
use crate::database::discussions::validate_content;
use crate::database::{DiscussionManager, DiscussionUpdate};
use crate::errors::{AppError, AppResult, ErrorCode};
use crate::llm::{ChatMessage, ChatRequest, ChatStream, LlmProvider, StreamChunk, TokenUsage};
use crate::logging::AppLogger;
use crate::models::{NewGenerationDetail, NewMessage};

/// Events of one interaction
pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// What to generate and where to attach it
#[derive(Debug, Clone, Default)]
pub struct InteractionRequest {
    /// Discussion to extend
    pub discussion_id: String,
    /// Message to reply under; the latest message when `None`
    pub parent_message_id: Option<String>,
    /// New user turn, persisted together with the reply
    pub user_content: Option<String>,
    /// Model; the provider default when `None`
    pub model: Option<String>,
    /// Sampling temperature
    pub temperature: Option<f32>,
    /// Completion token limit
    pub max_tokens: Option<u32>,
    /// Overrides the configured deadline
    pub deadline: Option<Duration>,
}

impl InteractionRequest {
    /// Reply in `discussion_id` under its latest message
    pub fn new(discussion_id: impl Into<String>) -> Self {
        Self {
            discussion_id: discussion_id.into(),
            ..Self::default()
        }
    }

    /// Reply under a specific message, creating a branch if it already has children
    #[must_use]
    pub fn reply_to(mut self, parent_message_id: impl Into<String>) -> Self {
        self.parent_message_id = Some(parent_message_id.into());
        self
    }

    /// Add a user turn before the reply
    #[must_use]
    pub fn with_user_message(mut self, content: impl Into<String>) -> Self {
        self.user_content = Some(content.into());
        self
    }

    /// Choose the model
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Limit generation wall-clock time
    #[must_use]
    pub const fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// A running interaction
///
/// Poll it (it is a [`Stream`]) or call [`next_event`](Self::next_event) to
/// receive chunks and the terminal event. Dropping it stops generation; once
/// the state reaches `Finalizing` the reply is committed regardless.
pub struct Interaction {
    id: String,
    discussion_id: String,
    state: watch::Receiver<InteractionState>,
    events: EventStream,
}

impl Interaction {
    /// Interaction identifier used in logs
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Discussion being extended
    #[must_use]
    pub fn discussion_id(&self) -> &str {
        &self.discussion_id
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> InteractionState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<InteractionState> {
        self.state.clone()
    }

    /// Next event, or `None` after the terminal event
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        self.events.next().await
    }

    /// Split into the state receiver and the event stream
    #[must_use]
    pub fn into_parts(self) -> (watch::Receiver<InteractionState>, EventStream) {
        (self.state, self.events)
    }
}

impl Stream for Interaction {
    type Item = StreamEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().events.as_mut().poll_next(cx)
    }
}

/// Orchestrates context loading, generation, persistence and naming
#[derive(Clone)]
pub struct InteractionEngine {
    manager: DiscussionManager,
    provider: Arc<dyn LlmProvider>,
    config: StreamingConfig,
}

impl InteractionEngine {
    /// Create an engine; reads go through the manager's cache when it has one
    #[must_use]
    pub fn new(
        manager: DiscussionManager,
        provider: Arc<dyn LlmProvider>,
        config: StreamingConfig,
    ) -> Self {
        Self {
            manager,
            provider,
            config,
        }
    }

    /// Tree manager used for reads and writes
    #[must_use]
    pub const fn manager(&self) -> &DiscussionManager {
        &self.manager
    }

    /// Load context and return the interaction, ready to stream
    ///
    /// Generation starts when the returned interaction is first polled.
    ///
    /// # Errors
    ///
    /// Fails before any stream exists when the discussion or parent cannot be
    /// found, the user content is invalid, the pricing would produce a negative
    /// cost, or `cancel` is already cancelled.
    #[instrument(skip_all, fields(discussion_id = %request.discussion_id))]
    pub async fn start(
        &self,
        request: InteractionRequest,
        cancel: CancellationToken,
    ) -> AppResult<Interaction> {
        if let Some(content) = &request.user_content {
            validate_content(content)?;
        }
        self.config.pricing.validate()?;
        if cancel.is_cancelled() {
            return Err(AppError::cancelled("Interaction cancelled before start"));
        }

        let interaction_id = Uuid::new_v4().to_string();
        let (guard, state) = StateGuard::new(interaction_id.clone());

        let tree = self.manager.cached_tree(&request.discussion_id).await?;
        let parent = match &request.parent_message_id {
            Some(id) => tree.get(id).ok_or_else(|| {
                AppError::invalid_parent(format!(
                    "Parent message {id} is not part of discussion {}",
                    request.discussion_id
                ))
            })?,
            None => tree
                .latest()
                .ok_or_else(|| AppError::not_found(format!("Discussion {}", request.discussion_id)))?,
        };
        let path: Vec<_> = tree
            .path_to(&parent.message.id)
            .unwrap_or_default()
            .into_iter()
            .map(|node| node.message.clone())
            .collect();
        let parent_id = parent.message.id.clone();

        let pending_title = (self.config.auto_title && tree.discussion.title.is_none()).then(|| {
            let mut turns: Vec<ChatMessage> = path.iter().map(ChatMessage::from).collect();
            if let Some(content) = &request.user_content {
                turns.push(ChatMessage::user(content.clone()));
            }
            PendingTitle {
                owner_id: tree.discussion.owner_id.clone(),
                turns,
            }
        });

        let messages = build_context(
            tree.discussion.system_prompt.as_deref(),
            &path,
            request.user_content.as_deref(),
            self.config.context_message_limit,
        );
        guard.advance(InteractionState::ContextLoaded);
        info!(
            interaction_id = %interaction_id,
            parent_id = %parent_id,
            context_messages = messages.len(),
            "Interaction context loaded"
        );

        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.provider.default_model().to_owned());
        let mut chat = ChatRequest::new(messages)
            .with_model(model.clone())
            .with_streaming();
        chat.temperature = request.temperature;
        chat.max_tokens = request.max_tokens;

        let generation = Generation {
            interaction_id: interaction_id.clone(),
            discussion_id: request.discussion_id.clone(),
            parent_id,
            user_content: request.user_content,
            chat,
            model,
            provider: Arc::clone(&self.provider),
            manager: self.manager.clone(),
            pricing: self.config.pricing,
            deadline: request.deadline.or(self.config.default_deadline),
            cancel,
            pending_title,
        };

        Ok(Interaction {
            id: interaction_id,
            discussion_id: request.discussion_id,
            state,
            events: generation.into_events(guard),
        })
    }
}

/// Everything the event stream owns once context is loaded
struct Generation {
    interaction_id: String,
    discussion_id: String,
    parent_id: String,
    user_content: Option<String>,
    chat: ChatRequest,
    model: String,
    provider: Arc<dyn LlmProvider>,
    manager: DiscussionManager,
    pricing: ModelPricing,
    deadline: Option<Duration>,
    cancel: CancellationToken,
    pending_title: Option<PendingTitle>,
}

/// Conversation an untitled discussion will be named from
struct PendingTitle {
    owner_id: String,
    turns: Vec<ChatMessage>,
}

/// Outcome of one wait inside the generation loop
enum Step<T> {
    Ready(T),
    Cancelled,
    DeadlineExceeded,
}

/// Resolves at `at`, or never
async fn deadline_reached(at: Option<Deadline>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

impl Generation {
    fn into_events(self, guard: StateGuard) -> EventStream {
        Box::pin(async_stream::stream! {
            let generation = self;
            let guard = guard;
            let started = Instant::now();
            let deadline_at = generation.deadline.map(|d| Deadline::now() + d);
            guard.advance(InteractionState::Generating);

            let opened = tokio::select! {
                biased;
                () = generation.cancel.cancelled() => Step::Cancelled,
                () = deadline_reached(deadline_at) => Step::DeadlineExceeded,
                result = generation.provider.complete_stream(&generation.chat) => Step::Ready(result),
            };
            let mut chunks: ChatStream = match opened {
                Step::Ready(Ok(stream)) => stream,
                Step::Ready(Err(e)) => {
                    yield generation.fail(&guard, &e, started);
                    return;
                }
                Step::Cancelled => {
                    yield generation.abort(&guard, started);
                    return;
                }
                Step::DeadlineExceeded => {
                    yield generation.fail(&guard, &generation.deadline_error(), started);
                    return;
                }
            };

            let mut content = String::new();
            let mut usage: Option<TokenUsage> = None;
            let mut finish_reason: Option<String> = None;
            loop {
                let step = tokio::select! {
                    biased;
                    () = generation.cancel.cancelled() => Step::Cancelled,
                    () = deadline_reached(deadline_at) => Step::DeadlineExceeded,
                    next = chunks.next() => Step::Ready(next),
                };
                match step {
                    Step::Ready(Some(Ok(chunk))) => {
                        let StreamChunk { delta, is_final, finish_reason: reason, usage: reported } = chunk;
                        if reported.is_some() {
                            usage = reported;
                        }
                        if reason.is_some() {
                            finish_reason = reason;
                        }
                        if !delta.is_empty() {
                            content.push_str(&delta);
                            yield StreamEvent::Chunk { delta };
                        }
                        if is_final {
                            break;
                        }
                    }
                    Step::Ready(Some(Err(e))) => {
                        drop(chunks);
                        yield generation.fail(&guard, &e, started);
                        return;
                    }
                    Step::Ready(None) => break,
                    Step::Cancelled => {
                        drop(chunks);
                        yield generation.abort(&guard, started);
                        return;
                    }
                    Step::DeadlineExceeded => {
                        drop(chunks);
                        yield generation.fail(&guard, &generation.deadline_error(), started);
                        return;
                    }
                }
            }
            // Release the provider connection before touching the store
            drop(chunks);

            if content.trim().is_empty() {
                let error = AppError::provider("Provider returned an empty response");
                yield generation.fail(&guard, &error, started);
                return;
            }
            if generation.cancel.is_cancelled() {
                yield generation.abort(&guard, started);
                return;
            }

            guard.advance(InteractionState::Finalizing);
            let detail = generation.detail(usage, finish_reason, started.elapsed());
            // Owns the guard from here on, so dropping the stream cannot split
            // the commit from its state change and cache invalidation
            let finalizing = tokio::spawn(generation.finalize(guard, content, detail, started));
            match finalizing.await {
                Ok(event) => {
                    yield event;
                }
                Err(e) => {
                    yield StreamEvent::Failed {
                        code: ErrorCode::InternalError,
                        message: format!("Finalization task failed: {e}"),
                    };
                }
            }
        })
    }

    /// Persist the reply, publish `Completed` and name an untitled discussion
    async fn finalize(
        self,
        guard: StateGuard,
        content: String,
        detail: NewGenerationDetail,
        started: Instant,
    ) -> StreamEvent {
        let event = match self.persist(content, detail).await {
            Ok(event) => event,
            Err(e) => return self.fail(&guard, &e, started),
        };
        guard.advance(InteractionState::Completed);
        AppLogger::log_interaction_outcome(
            &self.interaction_id,
            &self.discussion_id,
            InteractionState::Completed.as_str(),
            started.elapsed().as_millis() as u64,
        );

        if let (Some(pending), StreamEvent::Completed { message, .. }) = (&self.pending_title, &event) {
            self.name_discussion(pending, &message.content).await;
        }
        event
    }

    /// Title failures are logged; the reply is already committed
    async fn name_discussion(&self, pending: &PendingTitle, reply: &str) {
        let mut turns = pending.turns.clone();
        turns.push(ChatMessage::assistant(reply));
        let Some(title) = generate_title(self.provider.as_ref(), &self.model, &turns).await else {
            return;
        };
        let update = DiscussionUpdate {
            title: Some(title),
            ..DiscussionUpdate::default()
        };
        match self
            .manager
            .update_discussion(&self.discussion_id, &pending.owner_id, update)
            .await
        {
            Ok(discussion) => info!(
                discussion_id = %self.discussion_id,
                title = discussion.title.as_deref().unwrap_or_default(),
                "Discussion titled"
            ),
            Err(e) => warn!(
                discussion_id = %self.discussion_id,
                error = %e,
                "Failed to store generated title"
            ),
        }
    }

    fn deadline_error(&self) -> AppError {
        let limit = self.deadline.unwrap_or_default();
        AppError::timeout(format!(
            "Generation exceeded its {}ms deadline",
            limit.as_millis()
        ))
    }

    fn fail(&self, guard: &StateGuard, error: &AppError, started: Instant) -> StreamEvent {
        guard.advance(InteractionState::Aborted);
        AppLogger::log_interaction_failure(
            &self.interaction_id,
            &self.discussion_id,
            error.code,
            &error.message,
        );
        AppLogger::log_interaction_outcome(
            &self.interaction_id,
            &self.discussion_id,
            InteractionState::Aborted.as_str(),
            started.elapsed().as_millis() as u64,
        );
        StreamEvent::Failed {
            code: error.code,
            message: error.message.clone(),
        }
    }

    fn abort(&self, guard: &StateGuard, started: Instant) -> StreamEvent {
        guard.advance(InteractionState::Aborted);
        AppLogger::log_interaction_outcome(
            &self.interaction_id,
            &self.discussion_id,
            "cancelled",
            started.elapsed().as_millis() as u64,
        );
        StreamEvent::Aborted {
            reason: "Cancelled by caller".to_owned(),
        }
    }

    fn detail(
        &self,
        usage: Option<TokenUsage>,
        finish_reason: Option<String>,
        latency: Duration,
    ) -> NewGenerationDetail {
        NewGenerationDetail {
            model: self.model.clone(),
            provider: Some(self.provider.name().to_owned()),
            prompt_tokens: usage.map(|u| i64::from(u.prompt_tokens)),
            completion_tokens: usage.map(|u| i64::from(u.completion_tokens)),
            total_tokens: usage.map(|u| i64::from(u.total_tokens)),
            cost: usage.map(|u| self.pricing.cost(&u)),
            latency_ms: Some(latency.as_millis() as i64),
            finish_reason,
        }
    }

    async fn persist(&self, content: String, detail: NewGenerationDetail) -> AppResult<StreamEvent> {
        if let Some(user_content) = &self.user_content {
            let exchange = self
                .manager
                .append_exchange(
                    &self.discussion_id,
                    &self.parent_id,
                    user_content,
                    &content,
                    detail,
                )
                .await?;
            return Ok(StreamEvent::Completed {
                user_message: Some(exchange.user),
                message: exchange.assistant,
                detail: exchange.detail,
            });
        }

        let (message, detail) = self
            .manager
            .append_message(
                &self.discussion_id,
                &self.parent_id,
                NewMessage::assistant(content),
                Some(detail),
            )
            .await?;
        let detail =
            detail.ok_or_else(|| AppError::internal("Assistant reply stored without detail"))?;
        Ok(StreamEvent::Completed {
            user_message: None,
            message,
            detail,
        })
    }
}
