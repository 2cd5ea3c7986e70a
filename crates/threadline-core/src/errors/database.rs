// ABOUTME: Classification of sqlx errors into Threadline error codes
// ABOUTME: Separates integrity violations from transient lock and pool failures
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Threadline Contributors

use super::{AppError, ErrorCode};
use sqlx::error::{DatabaseError, ErrorKind};

/// `SQLite` primary result codes that signal contention rather than bad data
const SQLITE_BUSY: &str = "5";
const SQLITE_LOCKED: &str = "6";

impl From<sqlx::Error> for AppError {
    fn from(error: sqlx::Error) -> Self {
        let code = classify(&error);
        Self::new(code, error.to_string()).with_source(error)
    }
}

fn classify(error: &sqlx::Error) -> ErrorCode {
    match error {
        sqlx::Error::RowNotFound => ErrorCode::ResourceNotFound,
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            ErrorCode::StoreUnavailable
        }
        sqlx::Error::Database(db) => classify_database(db.as_ref()),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            ErrorCode::SerializationError
        }
        _ => ErrorCode::DatabaseError,
    }
}

fn classify_database(db: &dyn DatabaseError) -> ErrorCode {
    match db.kind() {
        ErrorKind::UniqueViolation
        | ErrorKind::ForeignKeyViolation
        | ErrorKind::NotNullViolation
        | ErrorKind::CheckViolation => ErrorCode::ConstraintViolation,
        _ if is_contention(db) => ErrorCode::StoreUnavailable,
        _ => ErrorCode::DatabaseError,
    }
}

fn is_contention(db: &dyn DatabaseError) -> bool {
    // Extended result codes keep the primary code in the low byte
    let primary = db
        .code()
        .and_then(|code| code.parse::<u32>().ok())
        .map(|code| (code & 0xff).to_string());
    if matches!(primary.as_deref(), Some(SQLITE_BUSY | SQLITE_LOCKED)) {
        return true;
    }
    let message = db.message().to_ascii_lowercase();
    message.contains("database is locked") || message.contains("database is busy")
}
