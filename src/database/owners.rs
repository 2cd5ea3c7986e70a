// ABOUTME: Owner account records in the entity store
// ABOUTME: Creation and lookup; discussions cascade when an owner is removed
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Threadline Contributors

use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use super::{format_timestamp, now_utc, parse_timestamp, Database};
use crate::errors::{AppError, AppResult};
use crate::models::Owner;

impl Database {
    /// Create an owner account
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for a blank name, or a store error
    pub async fn create_owner(&self, name: &str) -> AppResult<Owner> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::invalid_input("Owner name cannot be empty"));
        }
        let owner = Owner {
            id: Uuid::new_v4().to_string(),
            name: name.to_owned(),
            created_at: now_utc(),
        };
        sqlx::query("INSERT INTO owners (id, name, created_at) VALUES ($1, $2, $3)")
            .bind(&owner.id)
            .bind(&owner.name)
            .bind(format_timestamp(&owner.created_at))
            .execute(self.pool())
            .await?;
        Ok(owner)
    }

    /// Look up an owner
    ///
    /// # Errors
    ///
    /// Returns `OwnerNotFound` when no such owner exists
    pub async fn get_owner(&self, owner_id: &str) -> AppResult<Owner> {
        let row = sqlx::query("SELECT id, name, created_at FROM owners WHERE id = $1")
            .bind(owner_id)
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| AppError::owner_not_found(owner_id))?;
        owner_from_row(&row)
    }

    /// List owners, oldest first
    ///
    /// # Errors
    ///
    /// Returns a store error if the query fails
    pub async fn list_owners(&self) -> AppResult<Vec<Owner>> {
        let rows = sqlx::query("SELECT id, name, created_at FROM owners ORDER BY created_at, id")
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(owner_from_row).collect()
    }
}

fn owner_from_row(row: &SqliteRow) -> AppResult<Owner> {
    Ok(Owner {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        created_at: parse_timestamp(row.try_get("created_at")?)?,
    })
}
