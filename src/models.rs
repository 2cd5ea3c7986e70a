// ABOUTME: Domain models re-exported from threadline-core
// ABOUTME: Discussions, messages, generation details and the assembled tree
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Threadline Contributors

pub use threadline_core::models::*;
