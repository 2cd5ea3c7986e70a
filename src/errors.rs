// ABOUTME: Unified error handling re-exported from threadline-core
// ABOUTME: Lets the main crate and its users refer to crate::errors
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Threadline Contributors

pub use threadline_core::errors::{AppError, AppResult, ErrorCode};
