// ABOUTME: Discussion commands for threadline-cli
// ABOUTME: Create, stream replies, inspect trees and branches, list and delete discussions
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Threadline Contributors

use std::io::Write;

use anyhow::{bail, Result};
use futures_util::StreamExt;
use threadline::database::{NewDiscussion, SummaryQuery};
use threadline::models::SummarySort;
use threadline::streaming::{InteractionRequest, StreamEvent};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::CliContext;
use crate::helpers::display;

pub async fn create(
    ctx: &CliContext,
    owner: String,
    title: Option<String>,
    system_prompt: Option<String>,
    content: String,
) -> Result<()> {
    let mut input = NewDiscussion::new(owner, content);
    if let Some(title) = title {
        input = input.with_title(title);
    }
    if let Some(prompt) = system_prompt {
        input = input.with_system_prompt(prompt);
    }
    let (discussion, root) = ctx.manager.init_structure(input).await?;
    println!("Created discussion {}", discussion.id);
    println!("Root message {}", root.id);
    Ok(())
}

pub async fn ask(
    ctx: &CliContext,
    discussion_id: String,
    parent: Option<String>,
    model: Option<String>,
    content: String,
) -> Result<()> {
    let mut request = InteractionRequest::new(discussion_id).with_user_message(content);
    if let Some(parent) = parent {
        request = request.reply_to(parent);
    }
    if let Some(model) = model {
        request = request.with_model(model);
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let mut interaction = ctx.engine.start(request, cancel).await?;
    let mut stdout = std::io::stdout();
    let mut outcome = Ok(());
    while let Some(event) = interaction.next().await {
        match event {
            StreamEvent::Chunk { delta } => {
                print!("{delta}");
                if let Err(e) = stdout.flush() {
                    warn!(error = %e, "Failed to flush stdout");
                }
            }
            StreamEvent::Completed {
                user_message,
                message,
                detail,
            } => {
                println!();
                if let Some(user) = user_message {
                    println!("User message {}", user.id);
                }
                display::display_detail(&message, &detail);
            }
            StreamEvent::Failed { code, message } => {
                println!();
                outcome = Err(anyhow::anyhow!("{code}: {message}"));
            }
            StreamEvent::Aborted { reason } => {
                println!();
                println!("Interrupted: {reason}. Nothing was saved.");
            }
        }
    }
    interrupt.abort();
    outcome
}

pub async fn tree(ctx: &CliContext, discussion_id: &str) -> Result<()> {
    let tree = ctx.manager.cached_tree(discussion_id).await?;
    display::display_tree(&tree);
    Ok(())
}

pub async fn history(ctx: &CliContext, discussion_id: &str, leaf_id: &str) -> Result<()> {
    let branch = ctx.manager.cached_history(discussion_id, leaf_id).await?;
    for message in &branch {
        display::display_message(message);
    }
    Ok(())
}

pub async fn list(
    ctx: &CliContext,
    owner: &str,
    page: u32,
    page_size: u32,
    search: Option<String>,
    sort: &str,
) -> Result<()> {
    let sort: SummarySort = sort.parse()?;
    let page = if search.is_none() && sort == SummarySort::UpdatedDesc {
        ctx.manager.cached_summaries(owner, page, page_size).await?
    } else {
        let query = SummaryQuery {
            query: search,
            sort,
            page,
            page_size,
        };
        ctx.manager.search_summaries(owner, &query).await?
    };
    display::display_summaries(&page);
    Ok(())
}

pub async fn delete(ctx: &CliContext, discussion_id: &str, owner: &str) -> Result<()> {
    if discussion_id.trim().is_empty() {
        bail!("Discussion ID must not be empty");
    }
    ctx.manager.delete_discussion(discussion_id, owner).await?;
    println!("Deleted discussion {discussion_id}");
    Ok(())
}
