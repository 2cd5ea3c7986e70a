// ABOUTME: Unified error handling with standard error codes for Threadline
// ABOUTME: AppError carries a code, a message and an optional source error
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Threadline Contributors

//! # Unified Error Handling System
//!
//! Every fallible operation in Threadline returns [`AppResult`]. The [`ErrorCode`]
//! is the stable, matchable part of an error; the message is for humans and logs.
//! Only [`ErrorCode::StoreUnavailable`] is considered transient and retried.

#[cfg(feature = "database-errors")]
mod database;
#[cfg(feature = "provider-errors")]
mod provider;

use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::fmt;
use thiserror::Error;

/// Standard error codes used throughout the application
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Entity store
    /// A uniqueness, foreign key, check or not-null rule was violated
    ConstraintViolation,
    /// The store is locked, busy or unreachable; the unit of work may be retried
    StoreUnavailable,
    /// The store failed in a way that does not fit another code
    DatabaseError,

    // Lookups
    /// The requested discussion or message does not exist
    ResourceNotFound,
    /// The owner referenced by a request does not exist
    OwnerNotFound,
    /// The parent message is missing or belongs to another discussion
    InvalidParent,

    // Generation
    /// The model provider failed, returned garbage, or produced nothing
    ProviderError,
    /// The generation deadline elapsed
    Timeout,
    /// The caller cancelled the interaction
    Cancelled,

    // Input and environment
    /// The request was rejected by validation
    InvalidInput,
    /// Configuration could not be read or is inconsistent
    ConfigError,
    /// A payload could not be encoded or decoded
    SerializationError,
    /// An unexpected internal failure
    InternalError,
}

impl ErrorCode {
    /// Stable upper-snake-case name, matching the serialized form
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ConstraintViolation => "CONSTRAINT_VIOLATION",
            Self::StoreUnavailable => "STORE_UNAVAILABLE",
            Self::DatabaseError => "DATABASE_ERROR",
            Self::ResourceNotFound => "RESOURCE_NOT_FOUND",
            Self::OwnerNotFound => "OWNER_NOT_FOUND",
            Self::InvalidParent => "INVALID_PARENT",
            Self::ProviderError => "PROVIDER_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::Cancelled => "CANCELLED",
            Self::InvalidInput => "INVALID_INPUT",
            Self::ConfigError => "CONFIG_ERROR",
            Self::SerializationError => "SERIALIZATION_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Get a user-friendly description of this error
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::ConstraintViolation => "A data integrity rule was violated",
            Self::StoreUnavailable => "The entity store is temporarily unavailable",
            Self::DatabaseError => "Database operation failed",
            Self::ResourceNotFound => "The requested resource was not found",
            Self::OwnerNotFound => "The owner does not exist",
            Self::InvalidParent => "The parent message is not part of this discussion",
            Self::ProviderError => "The language model provider failed",
            Self::Timeout => "The operation exceeded its deadline",
            Self::Cancelled => "The operation was cancelled",
            Self::InvalidInput => "The provided input is invalid",
            Self::ConfigError => "Configuration error encountered",
            Self::SerializationError => "Data serialization/deserialization failed",
            Self::InternalError => "An internal error occurred",
        }
    }

    /// Whether a unit of work failing with this code may be retried as a whole
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unified error type for the application
#[derive(Debug, Error)]
pub struct AppError {
    /// Error code
    pub code: ErrorCode,
    /// Human-readable error message
    pub message: String,
    /// Source error for error chaining
    #[source]
    pub source: Option<Box<dyn StdError + Send + Sync>>,
}

impl AppError {
    /// Create a new `AppError` with the given code and message
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Add a source error for error chaining
    #[must_use]
    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Whether the failed unit of work may be retried
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    /// Resource not found
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::ResourceNotFound,
            format!("{} not found", resource.into()),
        )
    }

    /// Owner not found
    pub fn owner_not_found(owner_id: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::OwnerNotFound,
            format!("Owner {owner_id} not found"),
        )
    }

    /// Parent message missing or foreign to the discussion
    pub fn invalid_parent(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidParent, message)
    }

    /// Invalid input
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    /// Data integrity rule violated
    pub fn constraint(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConstraintViolation, message)
    }

    /// Transient store failure
    pub fn store_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::StoreUnavailable, message)
    }

    /// Database error
    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DatabaseError, message)
    }

    /// Model provider failure
    pub fn provider(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ProviderError, message)
    }

    /// Deadline elapsed
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Timeout, message)
    }

    /// Cancelled by the caller
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Cancelled, message)
    }

    /// Configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigError, message)
    }

    /// Serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::SerializationError, message)
    }

    /// Internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.description(), self.message)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(error: serde_json::Error) -> Self {
        Self::serialization(format!("JSON error: {error}")).with_source(error)
    }
}

impl From<chrono::ParseError> for AppError {
    fn from(error: chrono::ParseError) -> Self {
        Self::serialization(format!("Invalid timestamp: {error}")).with_source(error)
    }
}

/// Result type alias for convenience
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_store_unavailable_is_retryable() {
        assert!(ErrorCode::StoreUnavailable.is_retryable());
        for code in [
            ErrorCode::ConstraintViolation,
            ErrorCode::DatabaseError,
            ErrorCode::ResourceNotFound,
            ErrorCode::InvalidParent,
            ErrorCode::ProviderError,
            ErrorCode::Timeout,
            ErrorCode::InvalidInput,
        ] {
            assert!(!code.is_retryable(), "{code} must not be retried");
        }
    }

    #[test]
    fn display_includes_description_and_message() {
        let err = AppError::not_found("Discussion abc");
        assert_eq!(err.code, ErrorCode::ResourceNotFound);
        assert_eq!(
            err.to_string(),
            "The requested resource was not found: Discussion abc not found"
        );
    }

    #[test]
    fn codes_serialize_screaming_snake_case() {
        let json = serde_json::to_string(&ErrorCode::InvalidParent).ok();
        assert_eq!(json.as_deref(), Some("\"INVALID_PARENT\""));
    }
}
