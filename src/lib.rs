// ABOUTME: Main library entry point for the Threadline conversation engine
// ABOUTME: Branching discussion store, response cache and streamed LLM generation
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Threadline Contributors

#![deny(unsafe_code)]

//! # Threadline
//!
//! Persists multi-party conversations as trees of messages, caches the derived
//! read views, and drives streamed language-model generation whose output is
//! committed back into the tree.
//!
//! ## Architecture
//!
//! - **database**: `SQLite` entity store, transactions and the discussion tree manager
//! - **cache**: In-process response cache with TTL, LRU and glob invalidation
//! - **llm**: Provider trait, SSE parsing and an OpenAI-compatible client
//! - **streaming**: Interaction engine with cancellation, deadlines and persistence
//! - **config** / **logging**: Environment-driven configuration and tracing setup

/// Unified error types re-exported from `threadline-core`
pub mod errors;

/// Application constants re-exported from `threadline-core`
pub mod constants;

/// Domain models re-exported from `threadline-core`
pub mod models;

/// Environment-driven configuration
pub mod config;

/// Structured logging setup
pub mod logging;

/// Entity store and discussion tree manager
pub mod database;

/// Response cache for discussion trees, histories and summaries
pub mod cache;

/// Language model provider abstraction
pub mod llm;

/// Streaming interaction engine
pub mod streaming;
