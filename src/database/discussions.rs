// ABOUTME: Discussion tree manager: creation, branching appends, tree reads and summaries
// ABOUTME: Every write is one transaction that keeps counters and timestamps consistent
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Threadline Contributors

//! # Discussion Tree Manager
//!
//! Stateless facade over the entity store. A discussion is a tree of messages
//! rooted at exactly one parentless message; any message may gain children,
//! which is how branches form. Writes:
//!
//! - validate content and the parent/discussion relationship
//! - insert the message (and its generation detail) in one transaction
//! - bump `message_count`, `total_tokens` and `updated_at` with relative updates
//! - invalidate cached views after the commit, before returning
//!
//! Reads run in a single transaction so the discussion row and its messages
//! come from the same snapshot.

use std::time::Instant;

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use tracing::{debug, instrument};
use uuid::Uuid;

use super::transactions::{retry_transaction, SqliteTransactionGuard};
use super::{format_timestamp, now_utc, parse_timestamp, Database};
use crate::cache::{CacheKey, ResponseCache};
use crate::constants::{discussions::UNTITLED_TITLE, limits};
use crate::errors::{AppError, AppResult};
use crate::logging::AppLogger;
use crate::models::{
    Discussion, DiscussionSummary, DiscussionTree, GenerationDetail, Message, MessageRole,
    NewGenerationDetail, NewMessage, SummaryPage, SummarySort,
};

const DISCUSSION_COLUMNS: &str = "id, owner_id, title, system_prompt, root_message_id, \
     message_count, total_tokens, created_at, updated_at";

const MESSAGE_COLUMNS: &str = "m.id, m.discussion_id, m.parent_id, m.role, m.content, m.seq, m.created_at";

/// Input for creating a discussion with its root message
#[derive(Debug, Clone)]
pub struct NewDiscussion {
    /// Owning account
    pub owner_id: String,
    /// Optional title
    pub title: Option<String>,
    /// Optional system prompt
    pub system_prompt: Option<String>,
    /// Root message; must not be an assistant reply
    pub first_message: NewMessage,
}

impl NewDiscussion {
    /// Discussion opened by a user message
    pub fn new(owner_id: impl Into<String>, first_user_message: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            title: None,
            system_prompt: None,
            first_message: NewMessage::user(first_user_message),
        }
    }

    /// Set the title
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set the system prompt
    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }
}

/// Fields to change on a discussion; an empty string clears the field
#[derive(Debug, Clone, Default)]
pub struct DiscussionUpdate {
    /// New title
    pub title: Option<String>,
    /// New system prompt
    pub system_prompt: Option<String>,
}

/// Filters and paging for summary listings
#[derive(Debug, Clone)]
pub struct SummaryQuery {
    /// Case-insensitive substring matched against title and first message
    pub query: Option<String>,
    /// Ordering
    pub sort: SummarySort,
    /// 1-based page number
    pub page: u32,
    /// Items per page
    pub page_size: u32,
}

impl Default for SummaryQuery {
    fn default() -> Self {
        Self {
            query: None,
            sort: SummarySort::default(),
            page: 1,
            page_size: limits::DEFAULT_PAGE_SIZE,
        }
    }
}

/// User message and assistant reply committed together
#[derive(Debug, Clone, PartialEq)]
pub struct AppendedExchange {
    /// The user message, child of the requested parent
    pub user: Message,
    /// The assistant reply, child of `user`
    pub assistant: Message,
    /// Generation detail of the reply
    pub detail: GenerationDetail,
}

/// Owned copy of an append request, rebuilt for each transaction attempt
#[derive(Debug, Clone)]
struct AppendInput {
    discussion_id: String,
    parent_id: String,
    message: NewMessage,
    detail: Option<NewGenerationDetail>,
}

/// Discussion tree operations over the entity store
#[derive(Clone)]
pub struct DiscussionManager {
    db: Database,
    cache: Option<ResponseCache>,
}

impl DiscussionManager {
    /// Manager without cache invalidation
    #[must_use]
    pub const fn new(db: Database) -> Self {
        Self { db, cache: None }
    }

    /// Invalidate `cache` after every committed write
    #[must_use]
    pub fn with_cache(mut self, cache: ResponseCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Underlying store
    #[must_use]
    pub const fn database(&self) -> &Database {
        &self.db
    }

    /// Cache invalidated by writes, if any
    #[must_use]
    pub const fn cache(&self) -> Option<&ResponseCache> {
        self.cache.as_ref()
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Create a discussion together with its root message
    ///
    /// # Errors
    ///
    /// - `InvalidInput` for empty or oversized content, or an assistant root
    /// - `OwnerNotFound` when the owner does not exist
    /// - store errors; nothing is persisted on failure
    #[instrument(skip(self, input), fields(owner_id = %input.owner_id))]
    pub async fn init_structure(&self, input: NewDiscussion) -> AppResult<(Discussion, Message)> {
        validate_content(&input.first_message.content)?;
        if input.first_message.role == MessageRole::Assistant {
            return Err(AppError::invalid_input(
                "A discussion cannot start with an assistant message",
            ));
        }
        let title = normalize_optional(input.title.as_deref(), limits::MAX_TITLE_CHARS, "Title")?;
        let system_prompt = normalize_optional(
            input.system_prompt.as_deref(),
            limits::MAX_SYSTEM_PROMPT_CHARS,
            "System prompt",
        )?;
        let input = NewDiscussion {
            title,
            system_prompt,
            ..input
        };

        let started = Instant::now();
        let (discussion, root) = self
            .db
            .run_transaction(None, move |conn| {
                Box::pin(insert_discussion(conn, input.clone()))
            })
            .await?;

        self.invalidate_owner(&discussion.owner_id);
        AppLogger::log_store_operation(
            "init_structure",
            &discussion.id,
            started.elapsed().as_millis() as u64,
        );
        Ok((discussion, root))
    }

    /// Append a message as a child of `parent_id`
    ///
    /// Assistant messages must carry a generation detail and other roles must
    /// not; both rows are written in the same transaction.
    ///
    /// # Errors
    ///
    /// - `ResourceNotFound` when the discussion does not exist
    /// - `InvalidParent` when the parent is missing or in another discussion
    /// - `InvalidInput` for bad content or a role/detail mismatch
    /// - `ConstraintViolation` for negative token counts, cost or latency
    #[instrument(skip(self, message, detail), fields(role = %message.role))]
    pub async fn append_message(
        &self,
        discussion_id: &str,
        parent_id: &str,
        message: NewMessage,
        detail: Option<NewGenerationDetail>,
    ) -> AppResult<(Message, Option<GenerationDetail>)> {
        validate_content(&message.content)?;
        match (message.role, &detail) {
            (MessageRole::Assistant, None) => {
                return Err(AppError::invalid_input(
                    "Assistant messages require a generation detail",
                ))
            }
            (MessageRole::User | MessageRole::System, Some(_)) => {
                return Err(AppError::invalid_input(
                    "Only assistant messages carry a generation detail",
                ))
            }
            _ => {}
        }

        let input = AppendInput {
            discussion_id: discussion_id.to_owned(),
            parent_id: parent_id.to_owned(),
            message,
            detail,
        };

        let started = Instant::now();
        let (owner_id, message, detail) = self
            .db
            .run_transaction(Some(discussion_id), move |conn| {
                Box::pin(insert_reply(conn, input.clone()))
            })
            .await?;

        self.invalidate_after_write(discussion_id, &owner_id);
        AppLogger::log_store_operation(
            "append_message",
            discussion_id,
            started.elapsed().as_millis() as u64,
        );
        Ok((message, detail))
    }

    /// Append a user message and the assistant reply to it in one transaction
    ///
    /// # Errors
    ///
    /// Same as [`append_message`](Self::append_message); on failure neither message exists
    #[instrument(skip(self, user_content, assistant_content, detail))]
    pub async fn append_exchange(
        &self,
        discussion_id: &str,
        parent_id: &str,
        user_content: &str,
        assistant_content: &str,
        detail: NewGenerationDetail,
    ) -> AppResult<AppendedExchange> {
        validate_content(user_content)?;
        validate_content(assistant_content)?;

        let user_input = AppendInput {
            discussion_id: discussion_id.to_owned(),
            parent_id: parent_id.to_owned(),
            message: NewMessage::user(user_content),
            detail: None,
        };
        let reply = NewMessage::assistant(assistant_content);

        let started = Instant::now();
        let (owner_id, exchange) = self
            .db
            .run_transaction(Some(discussion_id), move |conn| {
                Box::pin(insert_exchange(
                    conn,
                    user_input.clone(),
                    reply.clone(),
                    detail.clone(),
                ))
            })
            .await?;

        self.invalidate_after_write(discussion_id, &owner_id);
        AppLogger::log_store_operation(
            "append_exchange",
            discussion_id,
            started.elapsed().as_millis() as u64,
        );
        Ok(exchange)
    }

    /// Change the title or system prompt of a discussion `owner_id` owns
    ///
    /// # Errors
    ///
    /// `ResourceNotFound` if the discussion does not exist or belongs to someone
    /// else, `InvalidInput` for oversized values
    pub async fn update_discussion(
        &self,
        discussion_id: &str,
        owner_id: &str,
        update: DiscussionUpdate,
    ) -> AppResult<Discussion> {
        let title = update
            .title
            .as_deref()
            .map(|t| normalize_optional(Some(t), limits::MAX_TITLE_CHARS, "Title"))
            .transpose()?;
        let system_prompt = update
            .system_prompt
            .as_deref()
            .map(|p| {
                normalize_optional(Some(p), limits::MAX_SYSTEM_PROMPT_CHARS, "System prompt")
            })
            .transpose()?;
        let (id, owner) = (discussion_id.to_owned(), owner_id.to_owned());

        let discussion = self
            .db
            .run_transaction(Some(discussion_id), move |conn| {
                Box::pin(apply_update(
                    conn,
                    id.clone(),
                    owner.clone(),
                    title.clone(),
                    system_prompt.clone(),
                ))
            })
            .await?;

        self.invalidate_after_write(discussion_id, &discussion.owner_id);
        Ok(discussion)
    }

    /// Replace the content of a message in place
    ///
    /// # Errors
    ///
    /// `ResourceNotFound` if the discussion is not owned by `owner_id` or the
    /// message is not part of it
    pub async fn edit_message(
        &self,
        discussion_id: &str,
        message_id: &str,
        owner_id: &str,
        content: &str,
    ) -> AppResult<Message> {
        validate_content(content)?;
        let (did, mid, owner, text) = (
            discussion_id.to_owned(),
            message_id.to_owned(),
            owner_id.to_owned(),
            content.to_owned(),
        );

        let message = self
            .db
            .run_transaction(Some(discussion_id), move |conn| {
                Box::pin(rewrite_message(
                    conn,
                    did.clone(),
                    mid.clone(),
                    owner.clone(),
                    text.clone(),
                ))
            })
            .await?;

        self.invalidate_after_write(discussion_id, owner_id);
        Ok(message)
    }

    /// Delete a discussion with all its messages and generation details
    ///
    /// # Errors
    ///
    /// `ResourceNotFound` if the discussion does not exist or belongs to someone else
    pub async fn delete_discussion(&self, discussion_id: &str, owner_id: &str) -> AppResult<()> {
        let (id, owner) = (discussion_id.to_owned(), owner_id.to_owned());
        self.db
            .run_transaction(Some(discussion_id), move |conn| {
                Box::pin(remove_discussion(conn, id.clone(), owner.clone()))
            })
            .await?;

        self.invalidate_after_write(discussion_id, owner_id);
        debug!(discussion_id, "Discussion deleted");
        Ok(())
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Load one discussion row
    ///
    /// # Errors
    ///
    /// `ResourceNotFound` if the discussion does not exist
    pub async fn get_discussion(&self, discussion_id: &str) -> AppResult<Discussion> {
        retry_transaction(
            || async {
                let mut conn = self.db.pool().acquire().await?;
                fetch_discussion(&mut conn, discussion_id).await
            },
            self.db.retry_config(),
        )
        .await
    }

    /// Load the full tree of a discussion with generation details
    ///
    /// # Errors
    ///
    /// `ResourceNotFound` if the discussion does not exist
    #[instrument(skip(self))]
    pub async fn get_tree(&self, discussion_id: &str) -> AppResult<DiscussionTree> {
        retry_transaction(|| self.load_tree(discussion_id), self.db.retry_config()).await
    }

    async fn load_tree(&self, discussion_id: &str) -> AppResult<DiscussionTree> {
        let mut guard = SqliteTransactionGuard::new(self.db.pool().begin().await?);
        let conn = guard.executor()?;
        let discussion = fetch_discussion(&mut *conn, discussion_id).await?;
        let rows = sqlx::query(&format!(
            r"
            SELECT {MESSAGE_COLUMNS},
                   g.id AS detail_id, g.model, g.provider, g.prompt_tokens,
                   g.completion_tokens, g.total_tokens, g.cost, g.latency_ms,
                   g.finish_reason, g.created_at AS detail_created_at
            FROM messages m
            LEFT JOIN generation_details g ON g.message_id = m.id
            WHERE m.discussion_id = $1
            ORDER BY m.created_at, m.seq
            "
        ))
        .bind(discussion_id)
        .fetch_all(&mut *conn)
        .await?;
        guard.commit().await?;

        let records = rows
            .iter()
            .map(|row| Ok((message_from_row(row)?, detail_from_joined_row(row)?)))
            .collect::<AppResult<Vec<_>>>()?;
        Ok(DiscussionTree::assemble(discussion, records))
    }

    /// Messages from the root down to `leaf_id`
    ///
    /// # Errors
    ///
    /// `ResourceNotFound` if the discussion or message does not exist in it
    pub async fn get_history(&self, discussion_id: &str, leaf_id: &str) -> AppResult<Vec<Message>> {
        retry_transaction(
            || self.load_history(discussion_id, leaf_id),
            self.db.retry_config(),
        )
        .await
    }

    async fn load_history(&self, discussion_id: &str, leaf_id: &str) -> AppResult<Vec<Message>> {
        let mut guard = SqliteTransactionGuard::new(self.db.pool().begin().await?);
        let conn = guard.executor()?;
        fetch_discussion(&mut *conn, discussion_id).await?;
        let rows = sqlx::query(&format!(
            r"
            WITH RECURSIVE path(id, parent_id, depth) AS (
                SELECT id, parent_id, 0 FROM messages WHERE id = $1 AND discussion_id = $2
                UNION ALL
                SELECT p.id, p.parent_id, path.depth + 1
                FROM messages p JOIN path ON p.id = path.parent_id
            )
            SELECT {MESSAGE_COLUMNS}
            FROM path JOIN messages m ON m.id = path.id
            ORDER BY path.depth DESC
            "
        ))
        .bind(leaf_id)
        .bind(discussion_id)
        .fetch_all(&mut *conn)
        .await?;
        guard.commit().await?;

        if rows.is_empty() {
            return Err(AppError::not_found(format!(
                "Message {leaf_id} in discussion {discussion_id}"
            )));
        }
        rows.iter().map(message_from_row).collect()
    }

    /// Most recently created message of a discussion
    ///
    /// # Errors
    ///
    /// `ResourceNotFound` if the discussion does not exist
    pub async fn get_latest_message(&self, discussion_id: &str) -> AppResult<Message> {
        let row = sqlx::query(&format!(
            r"
            SELECT {MESSAGE_COLUMNS} FROM messages m
            WHERE m.discussion_id = $1
            ORDER BY m.created_at DESC, m.seq DESC
            LIMIT 1
            "
        ))
        .bind(discussion_id)
        .fetch_optional(self.db.pool())
        .await?
        .ok_or_else(|| AppError::not_found(format!("Discussion {discussion_id}")))?;
        message_from_row(&row)
    }

    /// One page of an owner's discussions, most recently updated first
    ///
    /// # Errors
    ///
    /// `OwnerNotFound` for an unknown owner, `InvalidInput` for page 0 or a bad page size
    pub async fn get_paginated_summaries(
        &self,
        owner_id: &str,
        page: u32,
        page_size: u32,
    ) -> AppResult<SummaryPage> {
        let query = SummaryQuery {
            page,
            page_size,
            ..SummaryQuery::default()
        };
        self.search_summaries(owner_id, &query).await
    }

    /// Summaries filtered by a title or first-message substring, in the requested order
    ///
    /// Derived fields for the whole page come from one query, not one per discussion.
    ///
    /// # Errors
    ///
    /// `OwnerNotFound` for an unknown owner, `InvalidInput` for page 0 or a bad page size
    pub async fn search_summaries(
        &self,
        owner_id: &str,
        query: &SummaryQuery,
    ) -> AppResult<SummaryPage> {
        if query.page == 0 {
            return Err(AppError::invalid_input("Page numbers start at 1"));
        }
        if query.page_size == 0 || query.page_size > limits::MAX_PAGE_SIZE {
            return Err(AppError::invalid_input(format!(
                "Page size must be between 1 and {}",
                limits::MAX_PAGE_SIZE
            )));
        }
        retry_transaction(
            || self.load_summaries(owner_id, query),
            self.db.retry_config(),
        )
        .await
    }

    async fn load_summaries(&self, owner_id: &str, query: &SummaryQuery) -> AppResult<SummaryPage> {
        let pattern = query
            .query
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(like_pattern);
        let offset = i64::from(query.page - 1) * i64::from(query.page_size);

        let mut guard = SqliteTransactionGuard::new(self.db.pool().begin().await?);
        let conn = guard.executor()?;

        let owner_exists = sqlx::query("SELECT 1 FROM owners WHERE id = $1")
            .bind(owner_id)
            .fetch_optional(&mut *conn)
            .await?
            .is_some();
        if !owner_exists {
            return Err(AppError::owner_not_found(owner_id));
        }

        let filter = r"
            d.owner_id = $1
            AND ($2 IS NULL
                 OR LOWER(COALESCE(d.title, '')) LIKE $2 ESCAPE '\'
                 OR LOWER(COALESCE(r.content, '')) LIKE $2 ESCAPE '\')";

        let total: i64 = sqlx::query_scalar(&format!(
            r"
            SELECT COUNT(*) FROM discussions d
            LEFT JOIN messages r ON r.id = d.root_message_id
            WHERE {filter}
            "
        ))
        .bind(owner_id)
        .bind(pattern.as_deref())
        .fetch_one(&mut *conn)
        .await?;

        let rows = sqlx::query(&format!(
            r"
            SELECT d.id, d.title, d.message_count, d.created_at, d.updated_at,
                   r.content AS first_content
            FROM discussions d
            LEFT JOIN messages r ON r.id = d.root_message_id
            WHERE {filter}
            ORDER BY {order}
            LIMIT $3 OFFSET $4
            ",
            order = order_clause(query.sort),
        ))
        .bind(owner_id)
        .bind(pattern.as_deref())
        .bind(i64::from(query.page_size))
        .bind(offset)
        .fetch_all(&mut *conn)
        .await?;
        guard.commit().await?;

        let items = rows
            .iter()
            .map(summary_from_row)
            .collect::<AppResult<Vec<_>>>()?;
        Ok(SummaryPage {
            items,
            total,
            page: query.page,
            page_size: query.page_size,
        })
    }

    /// Messages of a discussion containing `query`, case-insensitive, oldest first
    ///
    /// # Errors
    ///
    /// `InvalidInput` for an empty query, `ResourceNotFound` for an unknown discussion
    pub async fn search_messages(&self, discussion_id: &str, query: &str) -> AppResult<Vec<Message>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(AppError::invalid_input("Search query cannot be empty"));
        }
        let pattern = like_pattern(query);
        retry_transaction(
            || self.load_matches(discussion_id, &pattern),
            self.db.retry_config(),
        )
        .await
    }

    async fn load_matches(&self, discussion_id: &str, pattern: &str) -> AppResult<Vec<Message>> {
        let mut guard = SqliteTransactionGuard::new(self.db.pool().begin().await?);
        let conn = guard.executor()?;
        fetch_discussion(&mut *conn, discussion_id).await?;
        let rows = sqlx::query(&format!(
            r"
            SELECT {MESSAGE_COLUMNS}
            FROM messages m
            WHERE m.discussion_id = $1 AND LOWER(m.content) LIKE $2 ESCAPE '\'
            ORDER BY m.created_at, m.seq
            LIMIT $3
            "
        ))
        .bind(discussion_id)
        .bind(pattern)
        .bind(i64::from(limits::MAX_SEARCH_RESULTS))
        .fetch_all(&mut *conn)
        .await?;
        guard.commit().await?;
        rows.iter().map(message_from_row).collect()
    }

    // ========================================================================
    // Cache coordination
    // ========================================================================

    /// [`get_tree`](Self::get_tree) through the cache, when one is attached
    ///
    /// # Errors
    ///
    /// Same as `get_tree`
    pub async fn cached_tree(&self, discussion_id: &str) -> AppResult<DiscussionTree> {
        match &self.cache {
            Some(cache) => {
                cache
                    .get_or_load(&CacheKey::tree(discussion_id), || {
                        self.get_tree(discussion_id)
                    })
                    .await
            }
            None => self.get_tree(discussion_id).await,
        }
    }

    /// [`get_history`](Self::get_history) through the cache, when one is attached
    ///
    /// # Errors
    ///
    /// Same as `get_history`
    pub async fn cached_history(
        &self,
        discussion_id: &str,
        leaf_id: &str,
    ) -> AppResult<Vec<Message>> {
        match &self.cache {
            Some(cache) => {
                cache
                    .get_or_load(&CacheKey::history(discussion_id, leaf_id), || {
                        self.get_history(discussion_id, leaf_id)
                    })
                    .await
            }
            None => self.get_history(discussion_id, leaf_id).await,
        }
    }

    /// [`get_paginated_summaries`](Self::get_paginated_summaries) through the cache
    ///
    /// # Errors
    ///
    /// Same as `get_paginated_summaries`
    pub async fn cached_summaries(
        &self,
        owner_id: &str,
        page: u32,
        page_size: u32,
    ) -> AppResult<SummaryPage> {
        match &self.cache {
            Some(cache) => {
                cache
                    .get_or_load(&CacheKey::summaries(owner_id, page, page_size), || {
                        self.get_paginated_summaries(owner_id, page, page_size)
                    })
                    .await
            }
            None => self.get_paginated_summaries(owner_id, page, page_size).await,
        }
    }

    fn invalidate_after_write(&self, discussion_id: &str, owner_id: &str) {
        if let Some(cache) = &self.cache {
            cache.invalidate_discussion(discussion_id);
            cache.invalidate_owner(owner_id);
        }
    }

    fn invalidate_owner(&self, owner_id: &str) {
        if let Some(cache) = &self.cache {
            cache.invalidate_owner(owner_id);
        }
    }
}

// ============================================================================
// Transaction bodies
// ============================================================================

async fn insert_discussion(
    conn: &mut SqliteConnection,
    input: NewDiscussion,
) -> AppResult<(Discussion, Message)> {
    let owner_exists = sqlx::query("SELECT 1 FROM owners WHERE id = $1")
        .bind(&input.owner_id)
        .fetch_optional(&mut *conn)
        .await?
        .is_some();
    if !owner_exists {
        return Err(AppError::owner_not_found(&input.owner_id));
    }

    let now = now_utc();
    let stamp = format_timestamp(&now);
    let discussion_id = Uuid::new_v4().to_string();
    let root_id = Uuid::new_v4().to_string();

    sqlx::query(
        r"
        INSERT INTO discussions (id, owner_id, title, system_prompt, root_message_id,
                                 message_count, total_tokens, next_seq, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, 1, 0, 1, $6, $6)
        ",
    )
    .bind(&discussion_id)
    .bind(&input.owner_id)
    .bind(input.title.as_deref())
    .bind(input.system_prompt.as_deref())
    .bind(&root_id)
    .bind(&stamp)
    .execute(&mut *conn)
    .await?;

    let root = Message {
        id: root_id.clone(),
        discussion_id: discussion_id.clone(),
        parent_id: None,
        role: input.first_message.role,
        content: input.first_message.content,
        seq: 1,
        created_at: now,
    };
    insert_message_row(conn, &root).await?;

    let discussion = Discussion {
        id: discussion_id,
        owner_id: input.owner_id,
        title: input.title,
        system_prompt: input.system_prompt,
        root_message_id: root_id,
        message_count: 1,
        total_tokens: 0,
        created_at: now,
        updated_at: now,
    };
    Ok((discussion, root))
}

async fn insert_reply(
    conn: &mut SqliteConnection,
    input: AppendInput,
) -> AppResult<(String, Message, Option<GenerationDetail>)> {
    let discussion = fetch_discussion(&mut *conn, &input.discussion_id).await?;
    check_parent(&mut *conn, &input.discussion_id, &input.parent_id).await?;

    let tokens = input.detail.as_ref().map_or(0, NewGenerationDetail::token_total);
    let now = now_utc();
    let seq = bump_discussion(&mut *conn, &input.discussion_id, 1, tokens, &now).await?;

    let message = Message {
        id: Uuid::new_v4().to_string(),
        discussion_id: input.discussion_id,
        parent_id: Some(input.parent_id),
        role: input.message.role,
        content: input.message.content,
        seq,
        created_at: now,
    };
    insert_message_row(&mut *conn, &message).await?;

    let detail = match input.detail {
        Some(detail) => Some(insert_detail_row(conn, &message.id, detail, now).await?),
        None => None,
    };
    Ok((discussion.owner_id, message, detail))
}

async fn insert_exchange(
    conn: &mut SqliteConnection,
    user_input: AppendInput,
    reply: NewMessage,
    detail: NewGenerationDetail,
) -> AppResult<(String, AppendedExchange)> {
    let discussion = fetch_discussion(&mut *conn, &user_input.discussion_id).await?;
    check_parent(&mut *conn, &user_input.discussion_id, &user_input.parent_id).await?;

    let now = now_utc();
    let last_seq = bump_discussion(
        &mut *conn,
        &user_input.discussion_id,
        2,
        detail.token_total(),
        &now,
    )
    .await?;

    let user = Message {
        id: Uuid::new_v4().to_string(),
        discussion_id: user_input.discussion_id.clone(),
        parent_id: Some(user_input.parent_id),
        role: MessageRole::User,
        content: user_input.message.content,
        seq: last_seq - 1,
        created_at: now,
    };
    insert_message_row(&mut *conn, &user).await?;

    let assistant = Message {
        id: Uuid::new_v4().to_string(),
        discussion_id: user_input.discussion_id,
        parent_id: Some(user.id.clone()),
        role: MessageRole::Assistant,
        content: reply.content,
        seq: last_seq,
        created_at: now,
    };
    insert_message_row(&mut *conn, &assistant).await?;
    let detail = insert_detail_row(conn, &assistant.id, detail, now).await?;

    Ok((
        discussion.owner_id,
        AppendedExchange {
            user,
            assistant,
            detail,
        },
    ))
}

async fn apply_update(
    conn: &mut SqliteConnection,
    discussion_id: String,
    owner_id: String,
    title: Option<Option<String>>,
    system_prompt: Option<Option<String>>,
) -> AppResult<Discussion> {
    fetch_owned_discussion(&mut *conn, &discussion_id, &owner_id).await?;
    let stamp = format_timestamp(&now_utc());
    sqlx::query(
        r"
        UPDATE discussions
        SET title = CASE WHEN $2 THEN $3 ELSE title END,
            system_prompt = CASE WHEN $4 THEN $5 ELSE system_prompt END,
            updated_at = MAX(updated_at, $6)
        WHERE id = $1
        ",
    )
    .bind(&discussion_id)
    .bind(title.is_some())
    .bind(title.flatten())
    .bind(system_prompt.is_some())
    .bind(system_prompt.flatten())
    .bind(&stamp)
    .execute(&mut *conn)
    .await?;
    fetch_discussion(conn, &discussion_id).await
}

async fn rewrite_message(
    conn: &mut SqliteConnection,
    discussion_id: String,
    message_id: String,
    owner_id: String,
    content: String,
) -> AppResult<Message> {
    fetch_owned_discussion(&mut *conn, &discussion_id, &owner_id).await?;
    let updated = sqlx::query("UPDATE messages SET content = $1 WHERE id = $2 AND discussion_id = $3")
        .bind(&content)
        .bind(&message_id)
        .bind(&discussion_id)
        .execute(&mut *conn)
        .await?;
    if updated.rows_affected() == 0 {
        return Err(AppError::not_found(format!(
            "Message {message_id} in discussion {discussion_id}"
        )));
    }
    sqlx::query("UPDATE discussions SET updated_at = MAX(updated_at, $2) WHERE id = $1")
        .bind(&discussion_id)
        .bind(format_timestamp(&now_utc()))
        .execute(&mut *conn)
        .await?;

    let row = sqlx::query(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages m WHERE m.id = $1"
    ))
    .bind(&message_id)
    .fetch_one(&mut *conn)
    .await?;
    message_from_row(&row)
}

async fn remove_discussion(
    conn: &mut SqliteConnection,
    discussion_id: String,
    owner_id: String,
) -> AppResult<()> {
    fetch_owned_discussion(&mut *conn, &discussion_id, &owner_id).await?;
    sqlx::query("DELETE FROM discussions WHERE id = $1")
        .bind(&discussion_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

// ============================================================================
// Statement helpers
// ============================================================================

async fn fetch_discussion(conn: &mut SqliteConnection, discussion_id: &str) -> AppResult<Discussion> {
    let row = sqlx::query(&format!(
        "SELECT {DISCUSSION_COLUMNS} FROM discussions WHERE id = $1"
    ))
    .bind(discussion_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::not_found(format!("Discussion {discussion_id}")))?;
    discussion_from_row(&row)
}

/// Discussion row, reported missing when `owner_id` does not own it
async fn fetch_owned_discussion(
    conn: &mut SqliteConnection,
    discussion_id: &str,
    owner_id: &str,
) -> AppResult<Discussion> {
    let discussion = fetch_discussion(conn, discussion_id).await?;
    if discussion.owner_id != owner_id {
        return Err(AppError::not_found(format!("Discussion {discussion_id}")));
    }
    Ok(discussion)
}

async fn check_parent(
    conn: &mut SqliteConnection,
    discussion_id: &str,
    parent_id: &str,
) -> AppResult<()> {
    let owner: Option<String> =
        sqlx::query_scalar("SELECT discussion_id FROM messages WHERE id = $1")
            .bind(parent_id)
            .fetch_optional(&mut *conn)
            .await?;
    match owner {
        None => Err(AppError::invalid_parent(format!(
            "Parent message {parent_id} does not exist"
        ))),
        Some(actual) if actual != discussion_id => Err(AppError::invalid_parent(format!(
            "Parent message {parent_id} belongs to another discussion"
        ))),
        Some(_) => Ok(()),
    }
}

/// Reserve `count` sequence numbers and bump counters; returns the last reserved seq
async fn bump_discussion(
    conn: &mut SqliteConnection,
    discussion_id: &str,
    count: i64,
    tokens: i64,
    now: &chrono::DateTime<chrono::Utc>,
) -> AppResult<i64> {
    let seq: i64 = sqlx::query_scalar(
        r"
        UPDATE discussions
        SET next_seq = next_seq + $2,
            message_count = message_count + $2,
            total_tokens = total_tokens + $3,
            updated_at = MAX(updated_at, $4)
        WHERE id = $1
        RETURNING next_seq
        ",
    )
    .bind(discussion_id)
    .bind(count)
    .bind(tokens)
    .bind(format_timestamp(now))
    .fetch_one(&mut *conn)
    .await?;
    Ok(seq)
}

async fn insert_message_row(conn: &mut SqliteConnection, message: &Message) -> AppResult<()> {
    sqlx::query(
        r"
        INSERT INTO messages (id, discussion_id, parent_id, role, content, seq, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ",
    )
    .bind(&message.id)
    .bind(&message.discussion_id)
    .bind(message.parent_id.as_deref())
    .bind(message.role.as_str())
    .bind(&message.content)
    .bind(message.seq)
    .bind(format_timestamp(&message.created_at))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn insert_detail_row(
    conn: &mut SqliteConnection,
    message_id: &str,
    detail: NewGenerationDetail,
    now: chrono::DateTime<chrono::Utc>,
) -> AppResult<GenerationDetail> {
    let detail = GenerationDetail {
        id: Uuid::new_v4().to_string(),
        message_id: message_id.to_owned(),
        model: detail.model,
        provider: detail.provider,
        prompt_tokens: detail.prompt_tokens,
        completion_tokens: detail.completion_tokens,
        total_tokens: detail.total_tokens,
        cost: detail.cost,
        latency_ms: detail.latency_ms,
        finish_reason: detail.finish_reason,
        created_at: now,
    };
    sqlx::query(
        r"
        INSERT INTO generation_details (id, message_id, model, provider, prompt_tokens,
                                        completion_tokens, total_tokens, cost, latency_ms,
                                        finish_reason, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ",
    )
    .bind(&detail.id)
    .bind(&detail.message_id)
    .bind(&detail.model)
    .bind(detail.provider.as_deref())
    .bind(detail.prompt_tokens)
    .bind(detail.completion_tokens)
    .bind(detail.total_tokens)
    .bind(detail.cost)
    .bind(detail.latency_ms)
    .bind(detail.finish_reason.as_deref())
    .bind(format_timestamp(&detail.created_at))
    .execute(&mut *conn)
    .await?;
    Ok(detail)
}

// ============================================================================
// Row mapping and validation
// ============================================================================

fn discussion_from_row(row: &SqliteRow) -> AppResult<Discussion> {
    Ok(Discussion {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        title: row.try_get("title")?,
        system_prompt: row.try_get("system_prompt")?,
        root_message_id: row.try_get("root_message_id")?,
        message_count: row.try_get("message_count")?,
        total_tokens: row.try_get("total_tokens")?,
        created_at: parse_timestamp(row.try_get("created_at")?)?,
        updated_at: parse_timestamp(row.try_get("updated_at")?)?,
    })
}

fn message_from_row(row: &SqliteRow) -> AppResult<Message> {
    let role: &str = row.try_get("role")?;
    Ok(Message {
        id: row.try_get("id")?,
        discussion_id: row.try_get("discussion_id")?,
        parent_id: row.try_get("parent_id")?,
        role: role.parse()?,
        content: row.try_get("content")?,
        seq: row.try_get("seq")?,
        created_at: parse_timestamp(row.try_get("created_at")?)?,
    })
}

fn detail_from_joined_row(row: &SqliteRow) -> AppResult<Option<GenerationDetail>> {
    let Some(id) = row.try_get::<Option<String>, _>("detail_id")? else {
        return Ok(None);
    };
    Ok(Some(GenerationDetail {
        id,
        message_id: row.try_get("id")?,
        model: row.try_get("model")?,
        provider: row.try_get("provider")?,
        prompt_tokens: row.try_get("prompt_tokens")?,
        completion_tokens: row.try_get("completion_tokens")?,
        total_tokens: row.try_get("total_tokens")?,
        cost: row.try_get("cost")?,
        latency_ms: row.try_get("latency_ms")?,
        finish_reason: row.try_get("finish_reason")?,
        created_at: parse_timestamp(row.try_get("detail_created_at")?)?,
    }))
}

fn summary_from_row(row: &SqliteRow) -> AppResult<DiscussionSummary> {
    let title: Option<String> = row.try_get("title")?;
    let first_content: Option<String> = row.try_get("first_content")?;
    Ok(DiscussionSummary {
        id: row.try_get("id")?,
        title: title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| UNTITLED_TITLE.to_owned()),
        preview: preview(first_content.as_deref().unwrap_or_default()),
        message_count: row.try_get("message_count")?,
        created_at: parse_timestamp(row.try_get("created_at")?)?,
        updated_at: parse_timestamp(row.try_get("updated_at")?)?,
    })
}

fn order_clause(sort: SummarySort) -> &'static str {
    match sort {
        SummarySort::UpdatedDesc => "d.updated_at DESC, d.id DESC",
        SummarySort::CreatedDesc => "d.created_at DESC, d.id DESC",
        SummarySort::TitleAsc => "COALESCE(d.title, '') COLLATE NOCASE ASC, d.id ASC",
        SummarySort::TitleDesc => "COALESCE(d.title, '') COLLATE NOCASE DESC, d.id DESC",
    }
}

/// Leading characters of `content`, cut on a character boundary
fn preview(content: &str) -> String {
    content.chars().take(limits::PREVIEW_CHARS).collect()
}

/// Lower-cased LIKE pattern with wildcards escaped
fn like_pattern(query: &str) -> String {
    let mut pattern = String::with_capacity(query.len() + 2);
    pattern.push('%');
    for ch in query.to_lowercase().chars() {
        if matches!(ch, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(ch);
    }
    pattern.push('%');
    pattern
}

pub(crate) fn validate_content(content: &str) -> AppResult<()> {
    if content.trim().is_empty() {
        return Err(AppError::invalid_input("Message content cannot be empty"));
    }
    let chars = content.chars().count();
    if chars > limits::MAX_MESSAGE_CHARS {
        return Err(AppError::invalid_input(format!(
            "Message content is {chars} characters; the limit is {}",
            limits::MAX_MESSAGE_CHARS
        )));
    }
    Ok(())
}

/// Trim an optional text field; blank becomes `None`
fn normalize_optional(value: Option<&str>, max_chars: usize, field: &str) -> AppResult<Option<String>> {
    let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    if value.chars().count() > max_chars {
        return Err(AppError::invalid_input(format!(
            "{field} exceeds {max_chars} characters"
        )));
    }
    Ok(Some(value.to_owned()))
}
