// ABOUTME: SQLite entity store with schema migration, transactions and write serialization
// ABOUTME: Owns the connection pool and the per-discussion write lock table
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Threadline Contributors

//! # Entity Store
//!
//! [`Database`] wraps a `SQLite` pool with foreign keys enforced. Writes go
//! through [`Database::run_transaction`], which serializes writers per
//! discussion, runs the unit of work in one transaction and retries it as a
//! whole on transient failures.

/// Discussion tree manager
pub mod discussions;
/// Owner accounts
mod owners;
/// Transaction guard and retry loop
pub mod transactions;

pub use discussions::{
    AppendedExchange, DiscussionManager, DiscussionUpdate, NewDiscussion, SummaryQuery,
};
pub use transactions::{retry_transaction, SqliteTransactionGuard, TransactionGuard};

use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{SqliteConnection, SqlitePool};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::{DatabaseConfig, TransactionRetryConfig};
use crate::errors::{AppError, AppResult};

/// Schema statements, applied in order
const SCHEMA: &[&str] = &[
    r"CREATE TABLE IF NOT EXISTS owners (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        created_at TEXT NOT NULL
    )",
    r"CREATE TABLE IF NOT EXISTS discussions (
        id TEXT PRIMARY KEY,
        owner_id TEXT NOT NULL REFERENCES owners(id) ON DELETE CASCADE,
        title TEXT,
        system_prompt TEXT,
        root_message_id TEXT NOT NULL,
        message_count INTEGER NOT NULL DEFAULT 0 CHECK (message_count >= 0),
        total_tokens INTEGER NOT NULL DEFAULT 0 CHECK (total_tokens >= 0),
        next_seq INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    r"CREATE INDEX IF NOT EXISTS idx_discussions_owner_updated
        ON discussions(owner_id, updated_at DESC)",
    r"CREATE TABLE IF NOT EXISTS messages (
        id TEXT PRIMARY KEY,
        discussion_id TEXT NOT NULL REFERENCES discussions(id) ON DELETE CASCADE,
        parent_id TEXT REFERENCES messages(id) ON DELETE CASCADE,
        role TEXT NOT NULL CHECK (role IN ('system', 'user', 'assistant')),
        content TEXT NOT NULL,
        seq INTEGER NOT NULL,
        created_at TEXT NOT NULL,
        UNIQUE (discussion_id, seq)
    )",
    r"CREATE INDEX IF NOT EXISTS idx_messages_discussion_order
        ON messages(discussion_id, created_at, seq)",
    r"CREATE INDEX IF NOT EXISTS idx_messages_parent ON messages(parent_id)",
    r"CREATE UNIQUE INDEX IF NOT EXISTS idx_messages_single_root
        ON messages(discussion_id) WHERE parent_id IS NULL",
    r"CREATE TABLE IF NOT EXISTS generation_details (
        id TEXT PRIMARY KEY,
        message_id TEXT NOT NULL UNIQUE REFERENCES messages(id) ON DELETE CASCADE,
        model TEXT NOT NULL,
        provider TEXT,
        prompt_tokens INTEGER CHECK (prompt_tokens IS NULL OR prompt_tokens >= 0),
        completion_tokens INTEGER CHECK (completion_tokens IS NULL OR completion_tokens >= 0),
        total_tokens INTEGER CHECK (total_tokens IS NULL OR total_tokens >= 0),
        cost REAL CHECK (cost IS NULL OR cost >= 0),
        latency_ms INTEGER CHECK (latency_ms IS NULL OR latency_ms >= 0),
        finish_reason TEXT,
        created_at TEXT NOT NULL
    )",
];

type WriteLocks = DashMap<String, Arc<Mutex<()>>>;

/// Handle to the entity store
///
/// Cheap to clone; clones share the pool and the write lock table.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
    retry: TransactionRetryConfig,
    write_locks: Arc<WriteLocks>,
}

impl Database {
    /// Connect using `config` and apply the schema when `auto_migrate` is set
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid, the database cannot be opened,
    /// or migration fails
    pub async fn new(config: &DatabaseConfig) -> AppResult<Self> {
        let options = SqliteConnectOptions::from_str(&config.url.to_connection_string())
            .map_err(|e| AppError::config(format!("Invalid DATABASE_URL '{}': {e}", config.url)))?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(config.busy_timeout);

        // Every connection to `sqlite::memory:` opens a separate database, so the
        // pool must hold exactly one connection and never recycle it
        let pool = if config.url.is_memory() {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(config.max_connections.max(1))
                .connect_with(options.journal_mode(SqliteJournalMode::Wal))
                .await?
        };

        let db = Self::from_pool(pool, config.retry);
        if config.auto_migrate {
            db.migrate().await?;
        }
        info!(url = %config.url, "Entity store ready");
        Ok(db)
    }

    /// Wrap an existing pool; the caller is responsible for enabling foreign keys
    #[must_use]
    pub fn from_pool(pool: SqlitePool, retry: TransactionRetryConfig) -> Self {
        Self {
            pool,
            retry,
            write_locks: Arc::new(DashMap::new()),
        }
    }

    /// Create tables and indexes if they do not exist
    ///
    /// # Errors
    ///
    /// Returns an error if a schema statement fails
    pub async fn migrate(&self) -> AppResult<()> {
        for &statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!(statements = SCHEMA.len(), "Schema applied");
        Ok(())
    }

    /// Underlying connection pool
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Retry policy used for units of work
    #[must_use]
    pub const fn retry_config(&self) -> &TransactionRetryConfig {
        &self.retry
    }

    /// Run `work` as one atomic unit
    ///
    /// When `lock_key` is given, writers for that key are serialized in-process
    /// for the whole unit including retries. `work` receives the transaction's
    /// connection and may be called again after a `StoreUnavailable` failure, so
    /// it must not carry state between calls. Nothing is persisted unless `work`
    /// returns `Ok` and the commit succeeds.
    ///
    /// # Errors
    ///
    /// Returns the error from `work` or from the commit
    pub async fn run_transaction<T, F>(&self, lock_key: Option<&str>, mut work: F) -> AppResult<T>
    where
        T: Send,
        F: for<'c> FnMut(&'c mut SqliteConnection) -> BoxFuture<'c, AppResult<T>> + Send,
    {
        let _lock = match lock_key {
            Some(key) => Some(self.lock_key(key).await),
            None => None,
        };

        let mut attempt: u32 = 0;
        loop {
            match self.attempt_transaction(&mut work).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.retry.max_retries => {
                    let backoff = self.retry.backoff_for(attempt);
                    warn!(
                        attempt = attempt + 1,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Store unavailable, retrying transaction"
                    );
                    sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn attempt_transaction<T, F>(&self, work: &mut F) -> AppResult<T>
    where
        F: for<'c> FnMut(&'c mut SqliteConnection) -> BoxFuture<'c, AppResult<T>>,
    {
        let started = Instant::now();
        let mut guard = SqliteTransactionGuard::new(self.pool.begin().await?);
        let value = work(guard.executor()?).await?;
        guard.commit().await?;
        debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Transaction committed"
        );
        Ok(value)
    }

    /// Serialize writers for `key` until the returned guard is dropped
    async fn lock_key(&self, key: &str) -> KeyLock {
        let mutex = self
            .write_locks
            .entry(key.to_owned())
            .or_default()
            .value()
            .clone();
        let guard = mutex.lock_owned().await;
        KeyLock {
            key: key.to_owned(),
            guard: Some(guard),
            locks: Arc::clone(&self.write_locks),
        }
    }
}

/// Held while a discussion is being written
struct KeyLock {
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<WriteLocks>,
}

impl Drop for KeyLock {
    fn drop(&mut self) {
        // Release first so our own handle no longer counts against the entry
        drop(self.guard.take());
        self.locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

/// Current time truncated to the stored precision
pub(crate) fn now_utc() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Fixed-width RFC 3339 form, so text comparison matches time order
pub(crate) fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp
pub(crate) fn parse_timestamp(value: &str) -> AppResult<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_sort_as_text() {
        let earlier = now_utc();
        let later = earlier + chrono::Duration::microseconds(1);
        assert!(format_timestamp(&earlier) < format_timestamp(&later));
        let parsed = parse_timestamp(&format_timestamp(&earlier)).ok();
        assert_eq!(parsed, Some(earlier));
    }
}
