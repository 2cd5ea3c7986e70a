// ABOUTME: Cache-related constants for TTL, capacity, and sweep intervals
// ABOUTME: Defaults for the in-process response cache that fronts discussion reads
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Threadline Contributors

/// Default maximum cache entries before least-recently-used eviction
pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 1_000;

/// Default entry lifetime in seconds
pub const DEFAULT_CACHE_TTL_SECS: u64 = 300; // 5 minutes

/// Default sweep interval in seconds for expired entries
pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 60;

/// Key namespace for per-discussion entries
pub const DISCUSSION_KEY_PREFIX: &str = "discussion";

/// Key namespace for per-owner entries
pub const OWNER_KEY_PREFIX: &str = "owner";
