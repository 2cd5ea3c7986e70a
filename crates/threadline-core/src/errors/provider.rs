// ABOUTME: Conversion of HTTP client errors into provider error codes
// ABOUTME: Timeouts keep their own code so callers can tell them apart
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Threadline Contributors

use super::{AppError, ErrorCode};

impl From<reqwest::Error> for AppError {
    fn from(error: reqwest::Error) -> Self {
        let code = if error.is_timeout() {
            ErrorCode::Timeout
        } else {
            ErrorCode::ProviderError
        };
        Self::new(code, format!("HTTP request failed: {error}")).with_source(error)
    }
}
