// ABOUTME: Integration tests for the in-memory response cache
// ABOUTME: TTL expiry, LRU capacity, scope invalidation, stale-load protection and the sweep task
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Threadline Contributors
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use threadline::cache::{CacheKey, ResponseCache};
use threadline::config::CacheConfig;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct Payload {
    value: String,
    count: u32,
}

fn payload(value: &str) -> Payload {
    Payload {
        value: value.to_owned(),
        count: 1,
    }
}

fn manual_cache(max_entries: usize, ttl: Duration) -> ResponseCache {
    ResponseCache::new(CacheConfig {
        max_entries,
        ttl,
        cleanup_interval: Duration::from_secs(3600),
        enable_background_cleanup: false,
    })
    .unwrap()
}

#[tokio::test]
async fn test_put_and_get() -> Result<()> {
    let cache = manual_cache(100, Duration::from_secs(60));
    let key = CacheKey::tree("d1");
    cache.put(&key, &payload("tree"))?;

    let hit: Option<Payload> = cache.get(&key)?;
    assert_eq!(hit, Some(payload("tree")));
    let miss: Option<Payload> = cache.get(&CacheKey::tree("d2"))?;
    assert!(miss.is_none());

    let stats = cache.stats();
    assert_eq!((stats.hits, stats.misses, stats.entries), (1, 1, 1));
    assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    Ok(())
}

#[tokio::test]
async fn test_entries_expire_after_ttl() -> Result<()> {
    let cache = manual_cache(100, Duration::from_millis(50));
    let key = CacheKey::history("d1", "m3");
    cache.put(&key, &payload("branch"))?;
    assert!(cache.exists(&key));
    assert!(cache.ttl(&key).is_some());

    tokio::time::sleep(Duration::from_millis(120)).await;

    assert!(!cache.exists(&key));
    let expired: Option<Payload> = cache.get(&key)?;
    assert!(expired.is_none());
    assert!(cache.is_empty());
    assert_eq!(cache.stats().expirations, 1);
    Ok(())
}

#[tokio::test]
async fn test_manual_sweep_removes_expired_entries() -> Result<()> {
    let cache = manual_cache(100, Duration::from_millis(30));
    for i in 0..5 {
        cache.put(&CacheKey::tree(format!("d{i}")), &payload("x"))?;
    }
    tokio::time::sleep(Duration::from_millis(80)).await;
    let (expired, evicted) = cache.sweep();
    assert_eq!((expired, evicted), (5, 0));
    assert_eq!(cache.len(), 0);
    Ok(())
}

#[tokio::test]
async fn test_capacity_evicts_least_recently_used() -> Result<()> {
    let cache = manual_cache(3, Duration::from_secs(60));
    let keys: Vec<CacheKey> = (0..3).map(|i| CacheKey::tree(format!("d{i}"))).collect();
    for key in &keys {
        cache.put(key, &payload("x"))?;
    }

    // Touch d0 so d1 becomes the oldest
    let _: Option<Payload> = cache.get(&keys[0])?;
    cache.put(&CacheKey::tree("d3"), &payload("x"))?;

    assert_eq!(cache.len(), 3);
    assert!(cache.exists(&keys[0]));
    assert!(!cache.exists(&keys[1]));
    assert!(cache.exists(&keys[2]));
    assert_eq!(cache.stats().evictions, 1);
    Ok(())
}

#[tokio::test]
async fn test_invalidate_discussion_leaves_other_scopes() -> Result<()> {
    let cache = manual_cache(100, Duration::from_secs(60));
    cache.put(&CacheKey::tree("d1"), &payload("a"))?;
    cache.put(&CacheKey::history("d1", "m1"), &payload("b"))?;
    cache.put(&CacheKey::history("d1", "m2"), &payload("c"))?;
    cache.put(&CacheKey::tree("d10"), &payload("d"))?;
    cache.put(&CacheKey::summaries("o1", 1, 20), &payload("e"))?;

    assert_eq!(cache.invalidate_discussion("d1"), 3);
    assert!(cache.exists(&CacheKey::tree("d10")), "prefix of another id survives");
    assert!(cache.exists(&CacheKey::summaries("o1", 1, 20)));

    assert_eq!(cache.invalidate_owner("o1"), 1);
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.stats().invalidations, 4);
    Ok(())
}

#[tokio::test]
async fn test_invalidate_pattern_and_single_key() -> Result<()> {
    let cache = manual_cache(100, Duration::from_secs(60));
    for leaf in ["m1", "m2", "m3"] {
        cache.put(&CacheKey::history("d1", leaf), &payload(leaf))?;
    }
    cache.put(&CacheKey::tree("d1"), &payload("tree"))?;

    assert_eq!(cache.invalidate_pattern("discussion:d1:history:*")?, 3);
    assert!(cache.exists(&CacheKey::tree("d1")));
    assert!(cache.invalidate(&CacheKey::tree("d1")));
    assert!(!cache.invalidate(&CacheKey::tree("d1")));
    assert!(cache.invalidate_pattern("[unclosed").is_err());
    Ok(())
}

#[tokio::test]
async fn test_versioned_put_rejects_stale_load() -> Result<()> {
    let cache = manual_cache(100, Duration::from_secs(60));
    let key = CacheKey::tree("d1");

    let epoch = cache.scope_epoch(&key);
    // A write lands while the load is in flight
    cache.invalidate_discussion("d1");
    assert!(!cache.put_versioned(&key, &payload("stale"), epoch)?);
    assert!(!cache.exists(&key));

    let fresh_epoch = cache.discussion_epoch("d1");
    assert_ne!(fresh_epoch, epoch);
    assert!(cache.put_versioned(&key, &payload("fresh"), fresh_epoch)?);
    assert!(cache.exists(&key));
    Ok(())
}

#[tokio::test]
async fn test_sweep_retires_old_invalidation_records() -> Result<()> {
    let cache = manual_cache(100, Duration::from_millis(30));
    for i in 0..100 {
        cache.invalidate_discussion(&format!("d{i}"));
    }
    assert_eq!(cache.tracked_scopes(), 100);

    tokio::time::sleep(Duration::from_millis(80)).await;
    cache.invalidate_owner("o1");
    cache.sweep();
    assert_eq!(cache.tracked_scopes(), 1, "only the recent invalidation is kept");
    Ok(())
}

#[tokio::test]
async fn test_clear_all_forgets_invalidation_records() -> Result<()> {
    let cache = manual_cache(100, Duration::from_secs(60));
    let key = CacheKey::tree("d1");
    let epoch = cache.scope_epoch(&key);
    for i in 0..50 {
        cache.invalidate_discussion(&format!("d{i}"));
    }
    cache.clear_all();
    assert_eq!(cache.tracked_scopes(), 0);
    assert!(!cache.put_versioned(&key, &payload("stale"), epoch)?);
    Ok(())
}

#[tokio::test]
async fn test_stale_load_stays_rejected_after_records_are_retired() -> Result<()> {
    let cache = manual_cache(100, Duration::from_millis(30));
    let key = CacheKey::tree("d1");

    let epoch = cache.scope_epoch(&key);
    cache.invalidate_discussion("d1");
    tokio::time::sleep(Duration::from_millis(80)).await;
    cache.sweep();
    assert_eq!(cache.tracked_scopes(), 0);

    assert!(!cache.put_versioned(&key, &payload("stale"), epoch)?);
    let current = cache.scope_epoch(&key);
    assert!(cache.put_versioned(&key, &payload("fresh"), current)?);
    Ok(())
}

#[tokio::test]
async fn test_ids_containing_separator_do_not_share_scope() -> Result<()> {
    let cache = manual_cache(100, Duration::from_secs(60));
    cache.put(&CacheKey::tree("a"), &payload("outer"))?;
    cache.put(&CacheKey::tree("a:b"), &payload("nested"))?;
    cache.put(&CacheKey::history("a:b", "m1"), &payload("branch"))?;

    assert_eq!(cache.invalidate_discussion("a"), 1);
    assert!(cache.exists(&CacheKey::tree("a:b")));
    assert!(cache.exists(&CacheKey::history("a:b", "m1")));

    assert_eq!(cache.invalidate_discussion("a:b"), 2);
    assert!(cache.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_get_or_load_loads_once_then_hits() -> Result<()> {
    let cache = manual_cache(100, Duration::from_secs(60));
    let key = CacheKey::summaries("o1", 1, 20);
    let mut loads = 0;

    for _ in 0..3 {
        let value: Payload = cache
            .get_or_load(&key, || {
                loads += 1;
                async { Ok(payload("page")) }
            })
            .await?;
        assert_eq!(value.value, "page");
    }
    assert_eq!(loads, 1);
    assert_eq!(cache.stats().hits, 2);
    Ok(())
}

#[tokio::test]
async fn test_get_or_load_does_not_cache_errors() -> Result<()> {
    let cache = manual_cache(100, Duration::from_secs(60));
    let key = CacheKey::tree("missing");
    let result: threadline::errors::AppResult<Payload> = cache
        .get_or_load(&key, || async {
            Err(threadline::errors::AppError::not_found("Discussion missing"))
        })
        .await;
    assert!(result.is_err());
    assert!(!cache.exists(&key));
    Ok(())
}

#[tokio::test]
async fn test_clear_all() -> Result<()> {
    let cache = manual_cache(100, Duration::from_secs(60));
    cache.put(&CacheKey::tree("d1"), &payload("a"))?;
    cache.put(&CacheKey::summaries("o1", 1, 20), &payload("b"))?;
    cache.clear_all();
    assert!(cache.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_background_sweep_expires_and_stops_on_shutdown() -> Result<()> {
    common::init_test_logging();
    let cache = ResponseCache::new(CacheConfig {
        max_entries: 100,
        ttl: Duration::from_millis(50),
        cleanup_interval: Duration::from_millis(25),
        enable_background_cleanup: true,
    })?;
    assert!(cache.sweeper_running());

    cache.put(&CacheKey::tree("d1"), &payload("short-lived"))?;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(cache.len(), 0, "sweep removed the expired entry without a read");

    cache.shutdown().await;
    assert!(!cache.sweeper_running());
    Ok(())
}

#[tokio::test]
async fn test_sweep_survives_clone_drop_until_shutdown() -> Result<()> {
    let cache = ResponseCache::new(CacheConfig {
        max_entries: 10,
        ttl: Duration::from_secs(1),
        cleanup_interval: Duration::from_millis(10),
        enable_background_cleanup: true,
    })?;
    let observer = cache.clone();
    drop(cache);
    assert!(observer.sweeper_running());
    observer.shutdown().await;
    assert!(!observer.sweeper_running());
    Ok(())
}
