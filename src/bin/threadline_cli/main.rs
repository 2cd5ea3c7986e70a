// ABOUTME: Threadline CLI - manage owners and discussions from the terminal
// ABOUTME: Streams replies from the configured OpenAI-compatible endpoint, Ctrl-C cancels
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Threadline Contributors
//!
//! Usage:
//! ```bash
//! # Create an owner
//! threadline-cli owner create --name alice
//!
//! # Start a discussion
//! threadline-cli discussion new --owner <OWNER_ID> --title "Trip" "Plan a weekend in Lyon"
//!
//! # Generate a reply under the latest message, or branch from an earlier one
//! threadline-cli discussion ask <DISCUSSION_ID> "What about museums?"
//! threadline-cli discussion ask <DISCUSSION_ID> --parent <MESSAGE_ID> "Cheaper options?"
//!
//! # Inspect
//! threadline-cli discussion tree <DISCUSSION_ID>
//! threadline-cli discussion list --owner <OWNER_ID> --search lyon
//! ```

mod commands;
mod helpers;

use anyhow::Result;
use clap::{Parser, Subcommand};
use threadline::config::{DatabaseUrl, ServerConfig};
use threadline::logging::LoggingConfig;
use tracing::info;

#[derive(Parser)]
#[command(
    name = "threadline-cli",
    about = "Threadline conversation store CLI",
    long_about = "Create owners and branching discussions, stream replies and browse discussion trees."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Database URL override
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Enable debug logging
    #[arg(long, short = 'v', global = true)]
    verbose: bool,
}

#[non_exhaustive]
#[derive(Subcommand)]
enum Command {
    /// Owner management commands
    Owner {
        #[command(subcommand)]
        action: OwnerCommand,
    },

    /// Discussion commands
    Discussion {
        #[command(subcommand)]
        action: DiscussionCommand,
    },
}

#[non_exhaustive]
#[derive(Subcommand)]
enum OwnerCommand {
    /// Create an owner
    Create {
        /// Display name
        #[arg(long)]
        name: String,
    },

    /// List owners
    List,
}

#[non_exhaustive]
#[derive(Subcommand)]
enum DiscussionCommand {
    /// Start a discussion with its first user message
    New {
        /// Owner ID
        #[arg(long)]
        owner: String,

        /// Title
        #[arg(long)]
        title: Option<String>,

        /// System prompt sent with every generation
        #[arg(long)]
        system_prompt: Option<String>,

        /// First user message
        content: String,
    },

    /// Send a user message and stream the reply
    Ask {
        /// Discussion ID
        discussion_id: String,

        /// Reply under this message instead of the latest one
        #[arg(long)]
        parent: Option<String>,

        /// Model override
        #[arg(long)]
        model: Option<String>,

        /// User message
        content: String,
    },

    /// Print the whole discussion tree
    Tree {
        /// Discussion ID
        discussion_id: String,
    },

    /// Print the branch ending at a message
    History {
        /// Discussion ID
        discussion_id: String,

        /// Last message of the branch
        leaf_id: String,
    },

    /// List an owner's discussions
    List {
        /// Owner ID
        #[arg(long)]
        owner: String,

        /// Page number, starting at 1
        #[arg(long, default_value = "1")]
        page: u32,

        /// Discussions per page
        #[arg(long, default_value = "20")]
        page_size: u32,

        /// Title or first-message filter
        #[arg(long)]
        search: Option<String>,

        /// `updated_desc`, `created_desc`, `title_asc` or `title_desc`
        #[arg(long, default_value = "updated_desc")]
        sort: String,
    },

    /// Delete a discussion and all of its messages
    Delete {
        /// Discussion ID
        discussion_id: String,

        /// Owner ID
        #[arg(long)]
        owner: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut logging = LoggingConfig::from_env();
    if cli.verbose {
        "debug".clone_into(&mut logging.level);
    }
    logging.init()?;

    let mut config = ServerConfig::from_env()?;
    if let Some(url) = cli.database_url {
        config.database.url = DatabaseUrl::parse_url(&url);
    }
    info!(database = %config.database.url, "Threadline CLI");

    let ctx = commands::CliContext::connect(config).await?;

    match cli.command {
        Command::Owner { action } => match action {
            OwnerCommand::Create { name } => commands::owner::create(&ctx, &name).await?,
            OwnerCommand::List => commands::owner::list(&ctx).await?,
        },
        Command::Discussion { action } => match action {
            DiscussionCommand::New {
                owner,
                title,
                system_prompt,
                content,
            } => {
                commands::discussion::create(&ctx, owner, title, system_prompt, content).await?;
            }
            DiscussionCommand::Ask {
                discussion_id,
                parent,
                model,
                content,
            } => {
                commands::discussion::ask(&ctx, discussion_id, parent, model, content).await?;
            }
            DiscussionCommand::Tree { discussion_id } => {
                commands::discussion::tree(&ctx, &discussion_id).await?;
            }
            DiscussionCommand::History {
                discussion_id,
                leaf_id,
            } => {
                commands::discussion::history(&ctx, &discussion_id, &leaf_id).await?;
            }
            DiscussionCommand::List {
                owner,
                page,
                page_size,
                search,
                sort,
            } => {
                commands::discussion::list(&ctx, &owner, page, page_size, search, &sort).await?;
            }
            DiscussionCommand::Delete {
                discussion_id,
                owner,
            } => {
                commands::discussion::delete(&ctx, &discussion_id, &owner).await?;
            }
        },
    }

    ctx.shutdown().await;
    Ok(())
}
