// ABOUTME: Core types and constants for the Threadline conversation engine
// ABOUTME: Foundation crate with error handling, discussion models, and constants
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Threadline Contributors

#![deny(unsafe_code)]

//! # Threadline Core
//!
//! Foundation crate providing shared types and constants for Threadline.
//! It changes infrequently, which keeps incremental builds of the main crate cheap.
//!
//! ## Modules
//!
//! - **errors**: Unified error handling with `AppError` and `ErrorCode`
//! - **constants**: Limits and defaults organized by domain
//! - **models**: Owners, discussions, messages, generation details and the discussion tree

/// Unified error handling system with standard error codes
pub mod errors;

/// Application constants organized by domain
pub mod constants;

/// Core data models (Discussion, Message, `DiscussionTree`, etc.)
pub mod models;
