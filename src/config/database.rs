// ABOUTME: Database configuration types for SQLite connections and transaction retries
// ABOUTME: Handles the database URL, pool sizing, busy timeout and retry backoff
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Threadline Contributors

use super::{env_flag, env_or};
use crate::constants::database;
use crate::errors::AppResult;
use std::env;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::PathBuf;
use std::time::Duration;

/// Type-safe database location
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseUrl {
    /// `SQLite` database with file path
    SQLite {
        /// Path to `SQLite` database file
        path: PathBuf,
    },
    /// In-memory `SQLite`
    Memory,
}

impl DatabaseUrl {
    /// Parse from string
    ///
    /// Accepts `sqlite::memory:`, `sqlite:<path>`, `sqlite://<path>` or a bare path.
    #[must_use]
    pub fn parse_url(s: &str) -> Self {
        let path_str = s
            .strip_prefix("sqlite://")
            .or_else(|| s.strip_prefix("sqlite:"))
            .unwrap_or(s);
        if path_str == ":memory:" {
            Self::Memory
        } else {
            Self::SQLite {
                path: PathBuf::from(path_str),
            }
        }
    }

    /// Convert to connection string
    #[must_use]
    pub fn to_connection_string(&self) -> String {
        match self {
            Self::SQLite { path } => format!("sqlite:{}", path.display()),
            Self::Memory => database::DEFAULT_DATABASE_URL.to_owned(),
        }
    }

    /// Check if this is an in-memory database
    #[must_use]
    pub const fn is_memory(&self) -> bool {
        matches!(self, Self::Memory)
    }
}

impl Default for DatabaseUrl {
    fn default() -> Self {
        Self::Memory
    }
}

impl Display for DatabaseUrl {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.to_connection_string())
    }
}

/// Retry policy for units of work that fail with a transient store error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionRetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Backoff before the first retry, doubled per attempt
    pub initial_backoff: Duration,
    /// Backoff ceiling
    pub max_backoff: Duration,
}

impl TransactionRetryConfig {
    /// Backoff before retry number `attempt` (0-based)
    #[must_use]
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 1_u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Policy that never retries
    #[must_use]
    pub const fn no_retry() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Load retry configuration from environment
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            max_retries: env_or("STORE_MAX_RETRIES", database::DEFAULT_STORE_MAX_RETRIES),
            initial_backoff: Duration::from_millis(env_or(
                "STORE_RETRY_INITIAL_MS",
                database::DEFAULT_RETRY_INITIAL_MS,
            )),
            max_backoff: Duration::from_millis(env_or(
                "STORE_RETRY_MAX_MS",
                database::DEFAULT_RETRY_MAX_MS,
            )),
        }
    }
}

impl Default for TransactionRetryConfig {
    fn default() -> Self {
        Self {
            max_retries: database::DEFAULT_STORE_MAX_RETRIES,
            initial_backoff: Duration::from_millis(database::DEFAULT_RETRY_INITIAL_MS),
            max_backoff: Duration::from_millis(database::DEFAULT_RETRY_MAX_MS),
        }
    }
}

/// Database connection and management configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database location
    pub url: DatabaseUrl,
    /// Pool size; in-memory databases always use a single connection
    pub max_connections: u32,
    /// How long `SQLite` waits on a lock before failing with busy
    pub busy_timeout: Duration,
    /// Apply the schema on startup
    pub auto_migrate: bool,
    /// Retry policy for transient failures
    pub retry: TransactionRetryConfig,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: DatabaseUrl::default(),
            max_connections: database::DEFAULT_MAX_CONNECTIONS,
            busy_timeout: Duration::from_millis(database::DEFAULT_BUSY_TIMEOUT_MS),
            auto_migrate: true,
            retry: TransactionRetryConfig::default(),
        }
    }
}

impl DatabaseConfig {
    /// In-memory database with defaults, for tests and throwaway sessions
    #[must_use]
    pub fn memory() -> Self {
        Self::default()
    }

    /// File-backed database with defaults
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            url: DatabaseUrl::SQLite { path: path.into() },
            ..Self::default()
        }
    }

    /// Load database configuration from environment
    ///
    /// # Errors
    ///
    /// Returns an error if `AUTO_MIGRATE` is not a boolean
    pub fn from_env() -> AppResult<Self> {
        Ok(Self {
            url: DatabaseUrl::parse_url(
                &env::var("DATABASE_URL")
                    .unwrap_or_else(|_| database::DEFAULT_DATABASE_URL.to_owned()),
            ),
            max_connections: env_or(
                "DATABASE_MAX_CONNECTIONS",
                database::DEFAULT_MAX_CONNECTIONS,
            ),
            busy_timeout: Duration::from_millis(env_or(
                "DATABASE_BUSY_TIMEOUT_MS",
                database::DEFAULT_BUSY_TIMEOUT_MS,
            )),
            auto_migrate: env_flag("AUTO_MIGRATE", true)?,
            retry: TransactionRetryConfig::from_env(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_memory_and_file_urls() {
        assert!(DatabaseUrl::parse_url("sqlite::memory:").is_memory());
        assert_eq!(
            DatabaseUrl::parse_url("sqlite:./data/threads.db"),
            DatabaseUrl::SQLite {
                path: PathBuf::from("./data/threads.db")
            }
        );
        assert_eq!(
            DatabaseUrl::parse_url("threads.db").to_connection_string(),
            "sqlite:threads.db"
        );
    }

    #[test]
    fn backoff_doubles_up_to_ceiling() {
        let retry = TransactionRetryConfig::default();
        assert_eq!(retry.backoff_for(0), Duration::from_millis(10));
        assert_eq!(retry.backoff_for(1), Duration::from_millis(20));
        assert_eq!(retry.backoff_for(2), Duration::from_millis(40));
        assert_eq!(retry.backoff_for(10), Duration::from_millis(200));
        assert_eq!(retry.backoff_for(40), Duration::from_millis(200));
    }
}
