// ABOUTME: Integration tests for discussion summary listings
// ABOUTME: Paging, recency order, derived fields, search filters and cache freshness
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Threadline Contributors
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use std::time::Duration;

use common::{create_cached_manager, create_test_discussion, create_test_owner};
use threadline::database::{NewDiscussion, SummaryQuery};
use threadline::errors::ErrorCode;
use threadline::models::{NewMessage, SummarySort};

async fn pause() {
    tokio::time::sleep(Duration::from_millis(5)).await;
}

#[tokio::test]
async fn test_pages_are_ordered_by_recent_activity() {
    let (manager, _cache) = create_cached_manager().await;
    let owner = create_test_owner(manager.database(), "alice").await;

    let mut ids = Vec::new();
    for i in 0..5 {
        let (discussion, _) = create_test_discussion(&manager, &owner, &format!("Topic {i}")).await;
        ids.push(discussion.id);
        pause().await;
    }

    let first = manager.get_paginated_summaries(&owner.id, 1, 2).await.unwrap();
    assert_eq!(first.total, 5);
    assert!(first.has_more());
    let first_ids: Vec<&str> = first.items.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(first_ids, vec![ids[4].as_str(), ids[3].as_str()]);

    let last = manager.get_paginated_summaries(&owner.id, 3, 2).await.unwrap();
    assert_eq!(last.items.len(), 1);
    assert!(!last.has_more());
    assert_eq!(last.items[0].id, ids[0]);

    let beyond = manager.get_paginated_summaries(&owner.id, 9, 2).await.unwrap();
    assert!(beyond.items.is_empty());
    assert_eq!(beyond.total, 5);
}

#[tokio::test]
async fn test_new_message_moves_discussion_to_front() {
    let (manager, _cache) = create_cached_manager().await;
    let owner = create_test_owner(manager.database(), "bob").await;
    let (old, old_root) = create_test_discussion(&manager, &owner, "Old").await;
    pause().await;
    create_test_discussion(&manager, &owner, "New").await;

    let before = manager.cached_summaries(&owner.id, 1, 20).await.unwrap();
    assert_ne!(before.items[0].id, old.id);

    pause().await;
    manager
        .append_message(&old.id, &old_root.id, NewMessage::user("bump"), None)
        .await
        .unwrap();

    let after = manager.cached_summaries(&owner.id, 1, 20).await.unwrap();
    assert_eq!(after.items[0].id, old.id);
    assert_eq!(after.items[0].message_count, 2);
}

#[tokio::test]
async fn test_summary_derived_fields() {
    let (manager, _cache) = create_cached_manager().await;
    let owner = create_test_owner(manager.database(), "carol").await;
    let long = "word ".repeat(60);
    manager
        .init_structure(NewDiscussion::new(owner.id.clone(), long.clone()))
        .await
        .unwrap();

    let page = manager.get_paginated_summaries(&owner.id, 1, 20).await.unwrap();
    let summary = &page.items[0];
    assert_eq!(summary.title, "Untitled Chat");
    assert_eq!(summary.preview.chars().count(), 100);
    assert!(long.starts_with(&summary.preview));
    assert_eq!(summary.message_count, 1);
}

#[tokio::test]
async fn test_owner_isolation_and_validation() {
    let (manager, _cache) = create_cached_manager().await;
    let owner = create_test_owner(manager.database(), "dave").await;
    let other = create_test_owner(manager.database(), "erin").await;
    create_test_discussion(&manager, &owner, "Mine").await;

    let empty = manager.get_paginated_summaries(&other.id, 1, 20).await.unwrap();
    assert_eq!(empty.total, 0);
    assert!(empty.items.is_empty());

    let err = manager
        .get_paginated_summaries("nobody", 1, 20)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::OwnerNotFound);

    let err = manager
        .get_paginated_summaries(&owner.id, 0, 20)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidInput);

    let err = manager
        .get_paginated_summaries(&owner.id, 1, 101)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidInput);
}

#[tokio::test]
async fn test_search_matches_title_or_first_message() {
    let (manager, _cache) = create_cached_manager().await;
    let owner = create_test_owner(manager.database(), "frank").await;
    manager
        .init_structure(NewDiscussion::new(owner.id.clone(), "Packing list").with_title("Japan trip"))
        .await
        .unwrap();
    manager
        .init_structure(NewDiscussion::new(owner.id.clone(), "Cheap flights to japan?"))
        .await
        .unwrap();
    manager
        .init_structure(NewDiscussion::new(owner.id.clone(), "Sourdough starter"))
        .await
        .unwrap();

    let query = SummaryQuery {
        query: Some("JAPAN".to_owned()),
        ..SummaryQuery::default()
    };
    let page = manager.search_summaries(&owner.id, &query).await.unwrap();
    assert_eq!(page.total, 2);

    let sorted = SummaryQuery {
        sort: SummarySort::TitleAsc,
        ..SummaryQuery::default()
    };
    let page = manager.search_summaries(&owner.id, &sorted).await.unwrap();
    let titles: Vec<&str> = page.items.iter().map(|s| s.title.as_str()).collect();
    assert_eq!(titles[2], "Japan trip");

    let wildcard = SummaryQuery {
        query: Some("%".to_owned()),
        ..SummaryQuery::default()
    };
    let page = manager.search_summaries(&owner.id, &wildcard).await.unwrap();
    assert_eq!(page.total, 0, "wildcards are matched literally");
}

#[tokio::test]
async fn test_deleted_discussion_leaves_cached_listing() {
    let (manager, _cache) = create_cached_manager().await;
    let owner = create_test_owner(manager.database(), "grace").await;
    let (discussion, _) = create_test_discussion(&manager, &owner, "Ephemeral").await;

    assert_eq!(manager.cached_summaries(&owner.id, 1, 20).await.unwrap().total, 1);
    manager
        .delete_discussion(&discussion.id, &owner.id)
        .await
        .unwrap();
    assert_eq!(manager.cached_summaries(&owner.id, 1, 20).await.unwrap().total, 0);
}
