// ABOUTME: Output formatting helpers for threadline-cli
// ABOUTME: Renders trees with indentation, branches, summaries and generation details
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Threadline Contributors

use threadline::models::{DiscussionTree, GenerationDetail, Message, SummaryPage};

const SNIPPET_CHARS: usize = 72;

fn snippet(content: &str) -> String {
    let flat: String = content
        .chars()
        .map(|c| if c.is_whitespace() { ' ' } else { c })
        .collect();
    match flat.char_indices().nth(SNIPPET_CHARS) {
        Some((idx, _)) => format!("{}...", &flat[..idx]),
        None => flat,
    }
}

/// Print every message indented by depth, branches in creation order
pub fn display_tree(tree: &DiscussionTree) {
    let discussion = &tree.discussion;
    println!(
        "{} ({} messages, {} tokens)",
        discussion.title.as_deref().unwrap_or("Untitled"),
        discussion.message_count,
        discussion.total_tokens
    );
    println!("{}", "=".repeat(80));
    for (depth, node) in tree.depth_first() {
        let branch_marker = if node.children.len() > 1 { " +" } else { "" };
        println!(
            "{}[{}] {} {}: {}{}",
            "  ".repeat(depth),
            node.message.seq,
            node.message.id,
            node.message.role,
            snippet(&node.message.content),
            branch_marker
        );
    }
}

/// Print one message in full
pub fn display_message(message: &Message) {
    println!("--- {} #{} ({})", message.role, message.seq, message.id);
    println!("{}", message.content);
}

/// Print an assistant reply's generation detail
pub fn display_detail(message: &Message, detail: &GenerationDetail) {
    println!("{}", "-".repeat(80));
    println!("Reply {} from {}", message.id, detail.model);
    if let Some(total) = detail.total_tokens {
        println!("   Tokens: {total}");
    }
    if let Some(cost) = detail.cost {
        println!("   Cost: {cost:.6}");
    }
    if let Some(latency) = detail.latency_ms {
        println!("   Latency: {latency} ms");
    }
}

/// Print one page of discussion summaries
pub fn display_summaries(page: &SummaryPage) {
    if page.items.is_empty() {
        println!("No discussions found");
        return;
    }
    for summary in &page.items {
        println!(
            "{}  {}  ({} messages, updated {})",
            summary.id,
            summary.title,
            summary.message_count,
            summary.updated_at.format("%Y-%m-%d %H:%M UTC")
        );
        println!("    {}", snippet(&summary.preview));
    }
    println!(
        "Page {} of {} discussions{}",
        page.page,
        page.total,
        if page.has_more() { ", more available" } else { "" }
    );
}
