// ABOUTME: Response cache configuration types
// ABOUTME: Capacity, entry TTL and background sweep cadence
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Threadline Contributors

use super::{env_flag, env_or};
use crate::constants::cache;
use crate::errors::{AppError, AppResult};
use std::time::Duration;

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries before least-recently-used eviction
    pub max_entries: usize,
    /// Lifetime of an entry after it is written
    pub ttl: Duration,
    /// Interval between background sweeps
    pub cleanup_interval: Duration,
    /// Run the background sweep (tests usually disable it and sweep by hand)
    pub enable_background_cleanup: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: cache::DEFAULT_CACHE_MAX_ENTRIES,
            ttl: Duration::from_secs(cache::DEFAULT_CACHE_TTL_SECS),
            cleanup_interval: Duration::from_secs(cache::DEFAULT_CLEANUP_INTERVAL_SECS),
            enable_background_cleanup: true,
        }
    }
}

impl CacheConfig {
    /// Load cache configuration from environment
    ///
    /// # Errors
    ///
    /// Returns an error if the capacity or an interval is zero
    pub fn from_env() -> AppResult<Self> {
        let config = Self {
            max_entries: env_or("CACHE_MAX_ENTRIES", cache::DEFAULT_CACHE_MAX_ENTRIES),
            ttl: Duration::from_secs(env_or("CACHE_TTL_SECS", cache::DEFAULT_CACHE_TTL_SECS)),
            cleanup_interval: Duration::from_secs(env_or(
                "CACHE_CLEANUP_INTERVAL_SECS",
                cache::DEFAULT_CLEANUP_INTERVAL_SECS,
            )),
            enable_background_cleanup: env_flag("CACHE_BACKGROUND_CLEANUP", true)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check that capacity and durations are usable
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the offending field
    pub fn validate(&self) -> AppResult<()> {
        if self.max_entries == 0 {
            return Err(AppError::config("CACHE_MAX_ENTRIES must be at least 1"));
        }
        if self.ttl.is_zero() {
            return Err(AppError::config("CACHE_TTL_SECS must be at least 1"));
        }
        if self.enable_background_cleanup && self.cleanup_interval.is_zero() {
            return Err(AppError::config(
                "CACHE_CLEANUP_INTERVAL_SECS must be at least 1",
            ));
        }
        Ok(())
    }
}
