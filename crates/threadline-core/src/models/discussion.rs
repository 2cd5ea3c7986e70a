// ABOUTME: Owner and discussion models plus summary listing types
// ABOUTME: Includes the sort orders accepted by paginated summary queries
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Threadline Contributors

use crate::errors::AppError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Account that owns discussions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    /// Owner identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// A discussion and its derived counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discussion {
    /// Discussion identifier
    pub id: String,
    /// Owning account
    pub owner_id: String,
    /// Optional title
    pub title: Option<String>,
    /// Optional system prompt prepended to every generation context
    pub system_prompt: Option<String>,
    /// The single message without a parent
    pub root_message_id: String,
    /// Number of messages in the tree
    pub message_count: i64,
    /// Sum of tokens reported by generation details
    pub total_tokens: i64,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last modification time, never moves backwards
    pub updated_at: DateTime<Utc>,
}

/// Listing row for an owner's discussions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscussionSummary {
    /// Discussion identifier
    pub id: String,
    /// Title, or the untitled placeholder
    pub title: String,
    /// Leading characters of the first message
    pub preview: String,
    /// Number of messages in the tree
    pub message_count: i64,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
}

/// One page of summaries and the total across all pages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryPage {
    /// Summaries on this page
    pub items: Vec<DiscussionSummary>,
    /// Matching discussions across every page
    pub total: i64,
    /// 1-based page number
    pub page: u32,
    /// Requested page size
    pub page_size: u32,
}

impl SummaryPage {
    /// Whether another page follows this one
    #[must_use]
    pub fn has_more(&self) -> bool {
        i64::from(self.page) * i64::from(self.page_size) < self.total
    }
}

/// Ordering for summary listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummarySort {
    /// Most recently updated first
    #[default]
    UpdatedDesc,
    /// Most recently created first
    CreatedDesc,
    /// Title A to Z
    TitleAsc,
    /// Title Z to A
    TitleDesc,
}

impl SummarySort {
    /// Stable name used in cache keys and CLI flags
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::UpdatedDesc => "updated_desc",
            Self::CreatedDesc => "created_desc",
            Self::TitleAsc => "title_asc",
            Self::TitleDesc => "title_desc",
        }
    }
}

impl FromStr for SummarySort {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "updated_desc" | "updated" => Ok(Self::UpdatedDesc),
            "created_desc" | "created" => Ok(Self::CreatedDesc),
            "title_asc" | "title" => Ok(Self::TitleAsc),
            "title_desc" => Ok(Self::TitleDesc),
            other => Err(AppError::invalid_input(format!(
                "Unknown sort order '{other}'"
            ))),
        }
    }
}
