// ABOUTME: Core data models for branching discussions
// ABOUTME: Owners, discussions, messages, generation details and the assembled tree
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Threadline Contributors

//! # Data Models
//!
//! Plain data types shared by the entity store, the response cache and the
//! streaming engine. Everything here is serializable so cached payloads and CLI
//! output use the same shapes.

mod discussion;
mod message;
mod tree;

pub use discussion::{Discussion, DiscussionSummary, Owner, SummaryPage, SummarySort};
pub use message::{GenerationDetail, Message, MessageRole, NewGenerationDetail, NewMessage};
pub use tree::{DiscussionTree, TreeNode};
