// ABOUTME: Owner commands for threadline-cli
// ABOUTME: Creates and lists discussion owners
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Threadline Contributors

use anyhow::Result;

use super::CliContext;

pub async fn create(ctx: &CliContext, name: &str) -> Result<()> {
    let owner = ctx.database.create_owner(name).await?;
    println!("Created owner {} ({})", owner.name, owner.id);
    Ok(())
}

pub async fn list(ctx: &CliContext) -> Result<()> {
    let owners = ctx.database.list_owners().await?;
    if owners.is_empty() {
        println!("No owners yet");
        return Ok(());
    }
    for owner in owners {
        println!(
            "{}  {}  created {}",
            owner.id,
            owner.name,
            owner.created_at.format("%Y-%m-%d %H:%M UTC")
        );
    }
    Ok(())
}
