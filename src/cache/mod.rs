// ABOUTME: Response cache keys and statistics for derived discussion views
// ABOUTME: Keys render to namespaced strings so whole discussions can be invalidated at once
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Threadline Contributors

//! # Response Cache
//!
//! A bounded, TTL-limited, in-process cache for read views (trees, branch
//! histories, summary pages). It is never authoritative: a miss or an expired
//! entry falls through to the entity store.
//!
//! ```rust,no_run
//! use threadline::cache::{CacheKey, ResponseCache};
//! use threadline::config::CacheConfig;
//! # async fn example() -> Result<(), threadline::errors::AppError> {
//! let cache = ResponseCache::new(CacheConfig::default())?;
//! let key = CacheKey::tree("d1");
//! cache.put(&key, &vec!["m1", "m2"])?;
//! let hit: Option<Vec<String>> = cache.get(&key)?;
//! assert!(hit.is_some());
//! cache.invalidate_discussion("d1");
//! cache.shutdown().await;
//! # Ok(())
//! # }
//! ```

/// In-memory implementation with background sweep
pub mod memory;

pub use memory::ResponseCache;

use std::borrow::Cow;
use std::fmt;

use serde::Serialize;

use crate::constants::cache::{DISCUSSION_KEY_PREFIX, OWNER_KEY_PREFIX};

/// Escape an id so it cannot contain the `:` key separator
///
/// `%` and `:` are percent-encoded; ids made of other characters (UUIDs in
/// practice) render unchanged.
fn escape_id(id: &str) -> Cow<'_, str> {
    if !id.contains([':', '%']) {
        return Cow::Borrowed(id);
    }
    let mut escaped = String::with_capacity(id.len() + 4);
    for ch in id.chars() {
        match ch {
            '%' => escaped.push_str("%25"),
            ':' => escaped.push_str("%3A"),
            other => escaped.push(other),
        }
    }
    Cow::Owned(escaped)
}

/// Structured cache key
///
/// Ids are escaped when rendered, so an id containing `:` never falls inside
/// another id's scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// Full message tree of a discussion
    Tree {
        /// Discussion the tree belongs to
        discussion_id: String,
    },
    /// Root-to-leaf path of one branch
    History {
        /// Discussion the branch belongs to
        discussion_id: String,
        /// Last message of the branch
        leaf_id: String,
    },
    /// One page of an owner's discussion summaries
    Summaries {
        /// Owner whose discussions are listed
        owner_id: String,
        /// 1-based page number
        page: u32,
        /// Items per page
        page_size: u32,
    },
}

impl CacheKey {
    /// Key for a discussion tree
    pub fn tree(discussion_id: impl Into<String>) -> Self {
        Self::Tree {
            discussion_id: discussion_id.into(),
        }
    }

    /// Key for a branch history
    pub fn history(discussion_id: impl Into<String>, leaf_id: impl Into<String>) -> Self {
        Self::History {
            discussion_id: discussion_id.into(),
            leaf_id: leaf_id.into(),
        }
    }

    /// Key for a summary page
    pub fn summaries(owner_id: impl Into<String>, page: u32, page_size: u32) -> Self {
        Self::Summaries {
            owner_id: owner_id.into(),
            page,
            page_size,
        }
    }

    /// Discussion this key is derived from, if any
    #[must_use]
    pub fn discussion_id(&self) -> Option<&str> {
        match self {
            Self::Tree { discussion_id } | Self::History { discussion_id, .. } => {
                Some(discussion_id)
            }
            Self::Summaries { .. } => None,
        }
    }

    /// Invalidation scope: every key sharing a scope is dropped together
    #[must_use]
    pub fn scope(&self) -> String {
        match self {
            Self::Tree { discussion_id } | Self::History { discussion_id, .. } => {
                Self::discussion_scope(discussion_id)
            }
            Self::Summaries { owner_id, .. } => Self::owner_scope(owner_id),
        }
    }

    /// Scope prefix shared by all keys of a discussion
    #[must_use]
    pub fn discussion_scope(discussion_id: &str) -> String {
        format!("{DISCUSSION_KEY_PREFIX}:{}", escape_id(discussion_id))
    }

    /// Scope prefix shared by all keys of an owner
    #[must_use]
    pub fn owner_scope(owner_id: &str) -> String {
        format!("{OWNER_KEY_PREFIX}:{}", escape_id(owner_id))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tree { discussion_id } => {
                write!(f, "{}:tree", Self::discussion_scope(discussion_id))
            }
            Self::History {
                discussion_id,
                leaf_id,
            } => write!(
                f,
                "{}:history:{}",
                Self::discussion_scope(discussion_id),
                escape_id(leaf_id)
            ),
            Self::Summaries {
                owner_id,
                page,
                page_size,
            } => write!(
                f,
                "{}:summaries:{page}:{page_size}",
                Self::owner_scope(owner_id)
            ),
        }
    }
}

/// Counters since the cache was created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Entries currently held
    pub entries: usize,
    /// Reads served from the cache
    pub hits: u64,
    /// Reads that fell through
    pub misses: u64,
    /// Entries removed to stay within capacity
    pub evictions: u64,
    /// Entries removed because their TTL elapsed
    pub expirations: u64,
    /// Entries removed by explicit invalidation
    pub invalidations: u64,
}

impl CacheStats {
    /// Fraction of reads that were hits
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
