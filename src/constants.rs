// ABOUTME: Application constants re-exported from threadline-core
// ABOUTME: Limits, cache defaults and store retry defaults
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Threadline Contributors

pub use threadline_core::constants::*;
