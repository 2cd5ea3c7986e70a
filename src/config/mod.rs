// ABOUTME: Configuration management module for the store, cache, engine and provider
// ABOUTME: Every section loads from environment variables with documented defaults
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Threadline Contributors

//! Configuration module for Threadline
//!
//! Configuration is environment-only. Each section has a `Default` that matches
//! the constants in `threadline-core` and a `from_env` that overlays variables.
//!
//! - **database**: `DATABASE_URL`, pool size, busy timeout, migrations, transaction retries
//! - **cache**: `CACHE_MAX_ENTRIES`, `CACHE_TTL_SECS`, `CACHE_CLEANUP_INTERVAL_SECS`
//! - **streaming**: deadline, context trimming, model pricing and automatic titles
//! - **provider**: `LOCAL_LLM_*` for the OpenAI-compatible endpoint

use std::env;
use std::str::FromStr;

use tracing::info;

use crate::errors::{AppError, AppResult};
use crate::llm::OpenAiCompatibleConfig;

/// Response cache configuration
pub mod cache;
/// Entity store configuration
pub mod database;
/// Interaction engine configuration
pub mod streaming;

pub use cache::CacheConfig;
pub use database::{DatabaseConfig, DatabaseUrl, TransactionRetryConfig};
pub use streaming::{ModelPricing, StreamingConfig};

/// Complete runtime configuration
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    /// Entity store
    pub database: DatabaseConfig,
    /// Response cache
    pub cache: CacheConfig,
    /// Interaction engine
    pub streaming: StreamingConfig,
    /// OpenAI-compatible provider endpoint
    pub provider: OpenAiCompatibleConfig,
}

impl ServerConfig {
    /// Load every configuration section from the environment
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is present but malformed
    pub fn from_env() -> AppResult<Self> {
        let config = Self {
            database: DatabaseConfig::from_env()?,
            cache: CacheConfig::from_env()?,
            streaming: StreamingConfig::from_env()?,
            provider: OpenAiCompatibleConfig::from_env(),
        };
        info!(
            database = %config.database.url,
            cache_max_entries = config.cache.max_entries,
            cache_ttl_secs = config.cache.ttl.as_secs(),
            provider_base_url = %config.provider.base_url,
            "Configuration loaded"
        );
        Ok(config)
    }
}

/// Read a variable, falling back to `default` when unset or unparsable
pub(crate) fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

/// Read a boolean flag, rejecting values other than true/false/1/0
pub(crate) fn env_flag(key: &str, default: bool) -> AppResult<bool> {
    match env::var(key) {
        Err(_) => Ok(default),
        Ok(value) => match value.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            other => Err(AppError::config(format!("Invalid {key} value: {other}"))),
        },
    }
}
