// ABOUTME: RAII transaction guard and retry loop for units of work against the store
// ABOUTME: Rolls back anything not committed and retries only transient store failures
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Threadline Contributors

//! Transactions for the entity store
//!
//! Every write the discussion manager performs runs inside one
//! [`TransactionGuard`]. A guard that goes out of scope without [`commit`]
//! rolls the whole unit back, so an error half way through a multi-row write
//! leaves nothing behind.
//!
//! [`retry_transaction`] reruns a whole unit of work when it failed with
//! `StoreUnavailable` (locked or busy database, exhausted pool). Integrity
//! failures are returned on the first attempt.
//!
//! [`commit`]: TransactionGuard::commit

use std::future::Future;

use sqlx::{Database, Sqlite, Transaction};
use tokio::time::sleep;
use tracing::{debug, error, warn};

use crate::config::TransactionRetryConfig;
use crate::errors::{AppError, AppResult};

/// Run `f` until it succeeds, fails permanently, or retries run out
///
/// Backoff starts at `retry.initial_backoff` and doubles per attempt up to
/// `retry.max_backoff`. `f` must start a fresh transaction each call.
///
/// # Errors
///
/// Returns the last error when it is not retryable or after `max_retries` retries
pub async fn retry_transaction<F, Fut, T>(mut f: F, retry: &TransactionRetryConfig) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        match f().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(retries = attempt, "Unit of work succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) if attempt >= retry.max_retries => {
                error!(
                    attempts = attempt + 1,
                    max_retries = retry.max_retries,
                    error = %e,
                    "Unit of work failed after max retries"
                );
                return Err(e);
            }
            Err(e) => {
                let backoff = retry.backoff_for(attempt);
                warn!(
                    attempt = attempt + 1,
                    max_retries = retry.max_retries,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Store unavailable, retrying unit of work after backoff"
                );
                sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}

/// RAII guard that rolls a transaction back unless it was committed
pub struct TransactionGuard<'c, DB: Database> {
    transaction: Option<Transaction<'c, DB>>,
    committed: bool,
}

impl<'c, DB: Database> TransactionGuard<'c, DB> {
    /// Wrap a transaction obtained from `pool.begin()`
    #[must_use]
    pub fn new(transaction: Transaction<'c, DB>) -> Self {
        Self {
            transaction: Some(transaction),
            committed: false,
        }
    }

    /// Commit and consume the guard
    ///
    /// # Errors
    ///
    /// Returns the classified store error if the commit fails; a busy database
    /// surfaces as `StoreUnavailable` so the caller's retry loop can rerun the unit
    pub async fn commit(mut self) -> AppResult<()> {
        let tx = self
            .transaction
            .take()
            .ok_or_else(|| AppError::internal("Transaction already consumed - cannot commit"))?;
        tx.commit().await.map_err(AppError::from)?;
        self.committed = true;
        debug!("Transaction committed");
        Ok(())
    }

    /// Roll back explicitly and consume the guard
    ///
    /// # Errors
    ///
    /// Returns an error if the rollback fails
    pub async fn rollback(mut self) -> AppResult<()> {
        let tx = self
            .transaction
            .take()
            .ok_or_else(|| AppError::internal("Transaction already consumed - cannot rollback"))?;
        tx.rollback().await.map_err(AppError::from)?;
        debug!("Transaction rolled back explicitly");
        Ok(())
    }

    /// Whether `commit` succeeded
    #[must_use]
    pub const fn is_committed(&self) -> bool {
        self.committed
    }

    /// Connection to run statements on inside the transaction
    ///
    /// # Errors
    ///
    /// Returns an error if the guard was already committed or rolled back
    pub fn executor(&mut self) -> AppResult<&mut <DB as Database>::Connection> {
        self.transaction.as_deref_mut().ok_or_else(|| {
            AppError::internal("Transaction already consumed - guard used after commit/rollback")
        })
    }
}

impl<DB: Database> Drop for TransactionGuard<'_, DB> {
    fn drop(&mut self) {
        if self.transaction.is_some() && !self.committed {
            debug!("Transaction dropped without commit - rolling back");
        }
    }
}

/// Transaction guard over the `SQLite` store
pub type SqliteTransactionGuard<'c> = TransactionGuard<'c, Sqlite>;
