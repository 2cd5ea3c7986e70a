// ABOUTME: Constants module with domain-separated organization
// ABOUTME: Limits, defaults and names shared by the store, cache and streaming engine
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Threadline Contributors

//! Constants grouped by domain.

/// Response cache defaults (capacity, TTL, sweep cadence)
pub mod cache;

/// Entity store defaults
pub mod database {
    /// Default database URL (in-memory `SQLite`)
    pub const DEFAULT_DATABASE_URL: &str = "sqlite::memory:";
    /// Default connection pool size
    pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;
    /// How long `SQLite` waits on a locked database before reporting busy
    pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
    /// Retries for a unit of work that failed with a transient store error
    pub const DEFAULT_STORE_MAX_RETRIES: u32 = 3;
    /// First retry backoff in milliseconds (doubles per attempt)
    pub const DEFAULT_RETRY_INITIAL_MS: u64 = 10;
    /// Backoff ceiling in milliseconds
    pub const DEFAULT_RETRY_MAX_MS: u64 = 200;
}

/// Validation limits for discussion content
pub mod limits {
    /// Maximum characters in a single message
    pub const MAX_MESSAGE_CHARS: usize = 100_000;
    /// Maximum characters in a discussion title
    pub const MAX_TITLE_CHARS: usize = 255;
    /// Maximum characters in a system prompt
    pub const MAX_SYSTEM_PROMPT_CHARS: usize = 10_000;
    /// Characters of the first message shown in a summary preview
    pub const PREVIEW_CHARS: usize = 100;
    /// Page size used when none is given
    pub const DEFAULT_PAGE_SIZE: u32 = 20;
    /// Largest page a summary listing will return
    pub const MAX_PAGE_SIZE: u32 = 100;
    /// Upper bound on search results
    pub const MAX_SEARCH_RESULTS: u32 = 200;
}

/// Streaming engine defaults
pub mod streaming {
    /// Wall-clock limit for one generation; 0 means none
    pub const DEFAULT_DEADLINE_SECS: u64 = 0;
    /// Most recent path messages sent to the model (0 = unlimited)
    pub const DEFAULT_CONTEXT_MESSAGE_LIMIT: usize = 50;
}

/// Generated discussion titles
pub mod titles {
    /// Longest generated title, including a trailing ellipsis
    pub const MAX_GENERATED_TITLE_CHARS: usize = 100;
    /// Shorter answers are not considered titles
    pub const MIN_GENERATED_TITLE_CHARS: usize = 3;
    /// Characters of conversation shown to the model
    pub const PREVIEW_CHARS: usize = 500;
    /// Completion token limit of the title request
    pub const MAX_TOKENS: u32 = 32;
    /// Give up on the provider after this long and use the fallback
    pub const TIMEOUT_SECS: u64 = 30;
}

/// Display names
pub mod discussions {
    /// Title shown for discussions that were never named
    pub const UNTITLED_TITLE: &str = "Untitled Chat";
}

/// Service names for logging
pub mod service_names {
    /// Main service name
    pub const THREADLINE: &str = "threadline";
}
