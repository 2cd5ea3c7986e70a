// ABOUTME: Integration tests for the discussion tree manager
// ABOUTME: Creation, appends, branching, history, edits, deletes, ownership and rollback on failure
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Threadline Contributors
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{
    create_cached_manager, create_file_database, create_test_database, create_test_discussion,
    create_test_owner,
};
use tokio::sync::Notify;
use tokio::time::timeout;
use threadline::cache::CacheKey;
use threadline::database::{DiscussionManager, DiscussionUpdate, NewDiscussion};
use threadline::errors::{AppError, ErrorCode};
use threadline::models::{MessageRole, NewGenerationDetail, NewMessage};

fn detail(tokens: i64) -> NewGenerationDetail {
    NewGenerationDetail {
        prompt_tokens: Some(tokens / 2),
        completion_tokens: Some(tokens - tokens / 2),
        total_tokens: Some(tokens),
        cost: Some(0.01),
        latency_ms: Some(120),
        finish_reason: Some("stop".to_owned()),
        ..NewGenerationDetail::for_model("test-model")
    }
}

#[tokio::test]
async fn test_init_structure_creates_discussion_with_root() {
    let db = create_test_database().await;
    let owner = create_test_owner(&db, "alice").await;
    let manager = DiscussionManager::new(db);

    let (discussion, root) = manager
        .init_structure(
            NewDiscussion::new(owner.id.clone(), "  How do tides work?")
                .with_title("Tides")
                .with_system_prompt("You are a physicist"),
        )
        .await
        .unwrap();

    assert_eq!(discussion.owner_id, owner.id);
    assert_eq!(discussion.title.as_deref(), Some("Tides"));
    assert_eq!(discussion.root_message_id, root.id);
    assert_eq!(discussion.message_count, 1);
    assert_eq!(root.seq, 1);
    assert!(root.parent_id.is_none());
    assert_eq!(root.role, MessageRole::User);

    let stored = manager.get_discussion(&discussion.id).await.unwrap();
    assert_eq!(stored, discussion);
}

#[tokio::test]
async fn test_init_structure_rejects_bad_input() {
    let db = create_test_database().await;
    let owner = create_test_owner(&db, "bob").await;
    let manager = DiscussionManager::new(db);

    let err = manager
        .init_structure(NewDiscussion::new("nobody", "hello"))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::OwnerNotFound);

    let err = manager
        .init_structure(NewDiscussion::new(owner.id.clone(), "   "))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidInput);

    let mut assistant_root = NewDiscussion::new(owner.id.clone(), "I speak first");
    assistant_root.first_message = NewMessage::assistant("I speak first");
    let err = manager.init_structure(assistant_root).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidInput);

    let err = manager
        .init_structure(NewDiscussion::new(owner.id.clone(), "ok").with_title("t".repeat(300)))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidInput);
}

#[tokio::test]
async fn test_append_builds_branches_with_increasing_seq() {
    let (manager, _cache) = create_cached_manager().await;
    let owner = create_test_owner(manager.database(), "carol").await;
    let (discussion, root) = create_test_discussion(&manager, &owner, "Name a fruit").await;

    let (first, first_detail) = manager
        .append_message(
            &discussion.id,
            &root.id,
            NewMessage::assistant("Apple"),
            Some(detail(40)),
        )
        .await
        .unwrap();
    let (second, _) = manager
        .append_message(
            &discussion.id,
            &root.id,
            NewMessage::assistant("Banana"),
            Some(detail(60)),
        )
        .await
        .unwrap();
    let (follow_up, none) = manager
        .append_message(&discussion.id, &second.id, NewMessage::user("Why?"), None)
        .await
        .unwrap();

    assert!(none.is_none());
    assert_eq!(first_detail.unwrap().message_id, first.id);
    assert_eq!((first.seq, second.seq, follow_up.seq), (2, 3, 4));

    let tree = manager.get_tree(&discussion.id).await.unwrap();
    assert_eq!(tree.discussion.message_count, 4);
    assert_eq!(tree.discussion.total_tokens, 100);
    let children: Vec<&str> = tree
        .children_of(&root.id)
        .iter()
        .map(|node| node.message.content.as_str())
        .collect();
    assert_eq!(children, vec!["Apple", "Banana"]);
    assert_eq!(tree.latest().unwrap().message.id, follow_up.id);
    assert!(tree.get(&first.id).unwrap().detail.is_some());

    let walk: Vec<(usize, &str)> = tree
        .depth_first()
        .into_iter()
        .map(|(depth, node)| (depth, node.message.content.as_str()))
        .collect();
    assert_eq!(
        walk,
        vec![(0, "Name a fruit"), (1, "Apple"), (1, "Banana"), (2, "Why?")]
    );
}

#[tokio::test]
async fn test_append_enforces_role_and_parent_rules() {
    let (manager, _cache) = create_cached_manager().await;
    let owner = create_test_owner(manager.database(), "dave").await;
    let (discussion, root) = create_test_discussion(&manager, &owner, "Root").await;
    let (_, other_root) = create_test_discussion(&manager, &owner, "Elsewhere").await;

    let err = manager
        .append_message(&discussion.id, &root.id, NewMessage::assistant("no detail"), None)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidInput);

    let err = manager
        .append_message(&discussion.id, &root.id, NewMessage::user("hi"), Some(detail(1)))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidInput);

    let err = manager
        .append_message(&discussion.id, "missing", NewMessage::user("hi"), None)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidParent);

    let err = manager
        .append_message(&discussion.id, &other_root.id, NewMessage::user("hi"), None)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidParent);

    let err = manager
        .append_message("missing", &root.id, NewMessage::user("hi"), None)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ResourceNotFound);

    assert_eq!(manager.get_tree(&discussion.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_failed_detail_insert_rolls_back_message() {
    let (manager, _cache) = create_cached_manager().await;
    let owner = create_test_owner(manager.database(), "erin").await;
    let (discussion, root) = create_test_discussion(&manager, &owner, "Root").await;

    let mut broken = detail(10);
    broken.cost = Some(-1.0);
    let err = manager
        .append_message(&discussion.id, &root.id, NewMessage::assistant("reply"), Some(broken))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ConstraintViolation);

    let tree = manager.get_tree(&discussion.id).await.unwrap();
    assert_eq!(tree.len(), 1);
    assert_eq!(tree.discussion.message_count, 1);
    assert_eq!(tree.discussion.total_tokens, 0);

    // The seq counter was rolled back too
    let (next, _) = manager
        .append_message(&discussion.id, &root.id, NewMessage::user("again"), None)
        .await
        .unwrap();
    assert_eq!(next.seq, 2);
}

#[tokio::test]
async fn test_append_exchange_links_user_and_reply() {
    let (manager, _cache) = create_cached_manager().await;
    let owner = create_test_owner(manager.database(), "frank").await;
    let (discussion, root) = create_test_discussion(&manager, &owner, "Start").await;

    let exchange = manager
        .append_exchange(&discussion.id, &root.id, "Question", "Answer", detail(30))
        .await
        .unwrap();

    assert_eq!(exchange.user.parent_id.as_deref(), Some(root.id.as_str()));
    assert_eq!(
        exchange.assistant.parent_id.as_deref(),
        Some(exchange.user.id.as_str())
    );
    assert_eq!((exchange.user.seq, exchange.assistant.seq), (2, 3));
    assert_eq!(exchange.detail.message_id, exchange.assistant.id);

    let history = manager
        .get_history(&discussion.id, &exchange.assistant.id)
        .await
        .unwrap();
    let contents: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["Start", "Question", "Answer"]);
}

#[tokio::test]
async fn test_history_follows_one_branch() {
    let (manager, _cache) = create_cached_manager().await;
    let owner = create_test_owner(manager.database(), "grace").await;
    let (discussion, root) = create_test_discussion(&manager, &owner, "Root").await;

    let left = manager
        .append_exchange(&discussion.id, &root.id, "Left?", "Left.", detail(2))
        .await
        .unwrap();
    let right = manager
        .append_exchange(&discussion.id, &root.id, "Right?", "Right.", detail(2))
        .await
        .unwrap();

    let path = manager
        .cached_history(&discussion.id, &right.assistant.id)
        .await
        .unwrap();
    assert_eq!(path.len(), 3);
    assert!(path.iter().all(|m| m.id != left.user.id));

    let err = manager
        .get_history(&discussion.id, "missing")
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ResourceNotFound);

    let latest = manager.get_latest_message(&discussion.id).await.unwrap();
    assert_eq!(latest.id, right.assistant.id);
}

#[tokio::test]
async fn test_writes_invalidate_cached_reads() {
    let (manager, cache) = create_cached_manager().await;
    let owner = create_test_owner(manager.database(), "heidi").await;
    let (discussion, root) = create_test_discussion(&manager, &owner, "Root").await;

    assert_eq!(manager.cached_tree(&discussion.id).await.unwrap().len(), 1);
    assert!(cache.exists(&CacheKey::tree(&discussion.id)));

    manager
        .append_message(&discussion.id, &root.id, NewMessage::user("more"), None)
        .await
        .unwrap();
    assert!(!cache.exists(&CacheKey::tree(&discussion.id)));
    assert_eq!(manager.cached_tree(&discussion.id).await.unwrap().len(), 2);

    let edited = manager
        .edit_message(&discussion.id, &root.id, &owner.id, "Root, revised")
        .await
        .unwrap();
    assert_eq!(edited.content, "Root, revised");
    let tree = manager.cached_tree(&discussion.id).await.unwrap();
    assert_eq!(tree.get(&root.id).unwrap().message.content, "Root, revised");
}

#[tokio::test]
async fn test_update_and_delete_require_ownership() {
    let (manager, _cache) = create_cached_manager().await;
    let owner = create_test_owner(manager.database(), "ivan").await;
    let intruder = create_test_owner(manager.database(), "mallory").await;
    let (discussion, root) = create_test_discussion(&manager, &owner, "Private").await;

    let update = DiscussionUpdate {
        title: Some("Renamed".to_owned()),
        system_prompt: None,
    };
    let err = manager
        .update_discussion(&discussion.id, &intruder.id, update.clone())
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ResourceNotFound);
    let err = manager
        .edit_message(&discussion.id, &root.id, &intruder.id, "hijacked")
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ResourceNotFound);
    let err = manager
        .delete_discussion(&discussion.id, &intruder.id)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ResourceNotFound);

    let renamed = manager
        .update_discussion(&discussion.id, &owner.id, update)
        .await
        .unwrap();
    assert_eq!(renamed.title.as_deref(), Some("Renamed"));
    assert!(renamed.updated_at >= discussion.updated_at);

    let cleared = manager
        .update_discussion(
            &discussion.id,
            &owner.id,
            DiscussionUpdate {
                title: Some(String::new()),
                system_prompt: None,
            },
        )
        .await
        .unwrap();
    assert!(cleared.title.is_none());

    manager
        .delete_discussion(&discussion.id, &owner.id)
        .await
        .unwrap();
    let err = manager.get_tree(&discussion.id).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::ResourceNotFound);
}

#[tokio::test]
async fn test_search_messages_within_discussion() {
    let (manager, _cache) = create_cached_manager().await;
    let owner = create_test_owner(manager.database(), "judy").await;
    let (discussion, root) = create_test_discussion(&manager, &owner, "Tell me about Rust").await;
    manager
        .append_exchange(
            &discussion.id,
            &root.id,
            "And 100% safe code?",
            "rust has unsafe blocks",
            detail(5),
        )
        .await
        .unwrap();

    let hits = manager.search_messages(&discussion.id, "RUST").await.unwrap();
    assert_eq!(hits.len(), 2);
    assert!(hits[0].seq < hits[1].seq);

    let literal = manager.search_messages(&discussion.id, "100%").await.unwrap();
    assert_eq!(literal.len(), 1);

    let err = manager.search_messages(&discussion.id, "  ").await.unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidInput);
}

#[tokio::test]
async fn test_concurrent_appends_get_distinct_seq() {
    let (manager, _cache) = create_cached_manager().await;
    let owner = create_test_owner(manager.database(), "ken").await;
    let (discussion, root) = create_test_discussion(&manager, &owner, "Root").await;

    let mut handles = Vec::new();
    for i in 0..8 {
        let manager = manager.clone();
        let (discussion_id, parent_id) = (discussion.id.clone(), root.id.clone());
        handles.push(tokio::spawn(async move {
            manager
                .append_message(
                    &discussion_id,
                    &parent_id,
                    NewMessage::user(format!("msg {i}")),
                    None,
                )
                .await
        }));
    }
    let mut seqs = Vec::new();
    for handle in handles {
        seqs.push(handle.await.unwrap().unwrap().0.seq);
    }
    seqs.sort_unstable();
    assert_eq!(seqs, (2..=9).collect::<Vec<i64>>());

    let tree = manager.get_tree(&discussion.id).await.unwrap();
    assert_eq!(tree.discussion.message_count, 9);
}

#[tokio::test]
async fn test_writer_on_one_discussion_does_not_block_another() {
    let dir = tempfile::tempdir().unwrap();
    let db = create_file_database(&dir).await;
    let owner = create_test_owner(&db, "lena").await;
    let manager = DiscussionManager::new(db.clone());
    let (busy, busy_root) = create_test_discussion(&manager, &owner, "Busy").await;
    let (free, free_root) = create_test_discussion(&manager, &owner, "Free").await;

    // Hold the write lock of `busy` until the gate opens
    let gate = Arc::new(Notify::new());
    let held = {
        let (db, gate, key) = (db.clone(), Arc::clone(&gate), busy.id.clone());
        tokio::spawn(async move {
            db.run_transaction::<(), _>(Some(&key), move |_conn| {
                let gate = Arc::clone(&gate);
                Box::pin(async move {
                    gate.notified().await;
                    Ok::<(), AppError>(())
                })
            })
            .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let other = timeout(
        Duration::from_secs(5),
        manager.append_message(&free.id, &free_root.id, NewMessage::user("go"), None),
    )
    .await;
    assert!(other.is_ok(), "a different discussion was blocked");
    other.unwrap().unwrap();

    let same = timeout(
        Duration::from_millis(100),
        manager.append_message(&busy.id, &busy_root.id, NewMessage::user("wait"), None),
    )
    .await;
    assert!(same.is_err(), "writers of one discussion must queue");

    gate.notify_one();
    held.await.unwrap().unwrap();
    let (message, _) = manager
        .append_message(&busy.id, &busy_root.id, NewMessage::user("after"), None)
        .await
        .unwrap();
    assert_eq!(message.seq, 2);
}
