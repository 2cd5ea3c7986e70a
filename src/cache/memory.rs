// ABOUTME: In-memory response cache with TTL expiry, LRU capacity eviction and a background sweep
// ABOUTME: Sharded map for per-key locking; scope epochs keep invalidated data from being re-cached
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Threadline Contributors

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{CacheKey, CacheStats};
use crate::config::CacheConfig;
use crate::errors::{AppError, AppResult};

/// Serialized payload plus the bookkeeping needed for TTL and LRU
#[derive(Debug)]
struct CacheEntry {
    data: Arc<[u8]>,
    inserted_at: Instant,
    last_access: Instant,
    /// Monotonic access stamp; lowest is least recently used
    tick: u64,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.duration_since(self.inserted_at) >= ttl
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    invalidations: AtomicU64,
}

/// Last invalidation of one scope
#[derive(Debug, Clone, Copy)]
struct EpochRecord {
    epoch: u64,
    at: Instant,
}

struct CacheInner {
    entries: DashMap<String, CacheEntry>,
    /// Scopes invalidated recently; older records are folded into `epoch_floor`
    epochs: DashMap<String, EpochRecord>,
    /// Source of epoch values, shared by all scopes so they never repeat
    generation: AtomicU64,
    /// Epoch of every scope without a record; at least any pruned record's epoch
    epoch_floor: AtomicU64,
    ticks: AtomicU64,
    counters: Counters,
    config: CacheConfig,
    shutdown: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl CacheInner {
    fn next_tick(&self) -> u64 {
        self.ticks.fetch_add(1, Ordering::Relaxed)
    }

    fn epoch(&self, scope: &str) -> u64 {
        self.epochs
            .get(scope)
            .map_or_else(|| self.epoch_floor.load(Ordering::Acquire), |r| r.epoch)
    }

    fn bump_epoch(&self, scope: &str) {
        let epoch = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.epochs.insert(
            scope.to_owned(),
            EpochRecord {
                epoch,
                at: Instant::now(),
            },
        );
    }

    /// Forget epoch records older than `retention`
    ///
    /// The floor is raised before a record is removed, so a scope's epoch never
    /// goes back to a value an in-flight load may have read.
    fn prune_epochs(&self, now: Instant, retention: Duration) -> usize {
        let stale: Vec<(String, u64)> = self
            .epochs
            .iter()
            .filter(|r| now.saturating_duration_since(r.value().at) >= retention)
            .map(|r| (r.key().clone(), r.value().epoch))
            .collect();
        let mut pruned = 0;
        for (scope, epoch) in stale {
            self.epoch_floor.fetch_max(epoch, Ordering::AcqRel);
            if self
                .epochs
                .remove_if(&scope, |_, record| record.epoch == epoch)
                .is_some()
            {
                pruned += 1;
            }
        }
        pruned
    }

    /// Drop expired entries and old epoch records, then trim to capacity
    fn sweep(&self) -> (u64, u64) {
        let now = Instant::now();
        let ttl = self.config.ttl;
        let mut expired = 0_u64;
        self.entries.retain(|_, entry| {
            let keep = !entry.is_expired(now, ttl);
            if !keep {
                expired += 1;
            }
            keep
        });
        self.counters
            .expirations
            .fetch_add(expired, Ordering::Relaxed);
        let pruned = self.prune_epochs(now, ttl);
        if pruned > 0 {
            debug!(pruned, "Pruned cache epoch records");
        }
        let evicted = self.enforce_capacity();
        (expired, evicted)
    }

    /// Evict least recently used entries until at most `max_entries` remain
    fn enforce_capacity(&self) -> u64 {
        let len = self.entries.len();
        if len <= self.config.max_entries {
            return 0;
        }
        let mut stamps: Vec<(String, u64)> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().tick))
            .collect();
        stamps.sort_unstable_by_key(|(_, tick)| *tick);

        let excess = len - self.config.max_entries;
        let mut evicted = 0_u64;
        for (key, tick) in stamps.into_iter().take(excess) {
            // Skip entries touched since the snapshot
            if self
                .entries
                .remove_if(&key, |_, entry| entry.tick == tick)
                .is_some()
            {
                evicted += 1;
            }
        }
        self.counters.evictions.fetch_add(evicted, Ordering::Relaxed);
        evicted
    }

    fn remove_scope(&self, scope: &str) -> u64 {
        self.bump_epoch(scope);
        let prefix = format!("{scope}:");
        let mut removed = 0_u64;
        self.entries.retain(|key, _| {
            let keep = !key.starts_with(&prefix);
            if !keep {
                removed += 1;
            }
            keep
        });
        self.counters
            .invalidations
            .fetch_add(removed, Ordering::Relaxed);
        removed
    }
}

impl Drop for CacheInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Shared in-memory response cache
///
/// Clones share the same entries. The background sweep holds only a weak
/// reference and stops when the last clone is dropped or [`shutdown`] is
/// called.
///
/// [`shutdown`]: ResponseCache::shutdown
#[derive(Clone)]
pub struct ResponseCache {
    inner: Arc<CacheInner>,
}

impl ResponseCache {
    /// Create a cache and, if enabled, start its background sweep
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an invalid config, or when background
    /// cleanup is enabled outside a Tokio runtime
    pub fn new(config: CacheConfig) -> AppResult<Self> {
        config.validate()?;
        let runtime = if config.enable_background_cleanup {
            Some(Handle::try_current().map_err(|e| {
                AppError::config(format!("Cache background cleanup needs a Tokio runtime: {e}"))
            })?)
        } else {
            None
        };

        let interval = config.cleanup_interval;
        let inner = Arc::new(CacheInner {
            entries: DashMap::new(),
            epochs: DashMap::new(),
            generation: AtomicU64::new(0),
            epoch_floor: AtomicU64::new(0),
            ticks: AtomicU64::new(0),
            counters: Counters::default(),
            config,
            shutdown: CancellationToken::new(),
            sweeper: Mutex::new(None),
        });

        if let Some(runtime) = runtime {
            let task = runtime.spawn(run_sweeper(
                Arc::downgrade(&inner),
                inner.shutdown.clone(),
                interval,
            ));
            if let Ok(mut slot) = inner.sweeper.lock() {
                *slot = Some(task);
            }
        }

        Ok(Self { inner })
    }

    /// Read and deserialize an entry; expired entries are removed and count as misses
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the payload no longer matches `T`
    pub fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> AppResult<Option<T>> {
        let key = key.to_string();
        let now = Instant::now();
        let ttl = self.inner.config.ttl;

        let data = match self.inner.entries.get_mut(&key) {
            Some(mut entry) => {
                if entry.is_expired(now, ttl) {
                    None
                } else {
                    entry.last_access = now;
                    entry.tick = self.inner.next_tick();
                    Some(Arc::clone(&entry.data))
                }
            }
            None => {
                self.inner.counters.misses.fetch_add(1, Ordering::Relaxed);
                return Ok(None);
            }
        };

        let Some(data) = data else {
            if self
                .inner
                .entries
                .remove_if(&key, |_, entry| entry.is_expired(Instant::now(), ttl))
                .is_some()
            {
                self.inner
                    .counters
                    .expirations
                    .fetch_add(1, Ordering::Relaxed);
            }
            self.inner.counters.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        };

        self.inner.counters.hits.fetch_add(1, Ordering::Relaxed);
        Ok(Some(serde_json::from_slice(&data)?))
    }

    /// Store `value` under `key`, replacing any previous entry
    ///
    /// # Errors
    ///
    /// Returns a serialization error if `value` cannot be encoded
    pub fn put<T: Serialize + ?Sized>(&self, key: &CacheKey, value: &T) -> AppResult<()> {
        self.insert(key.to_string(), serde_json::to_vec(value)?);
        self.inner.enforce_capacity();
        Ok(())
    }

    /// Store `value` only if `key`'s scope has not been invalidated since `epoch`
    ///
    /// Pair with [`scope_epoch`](Self::scope_epoch) read before loading the
    /// value, so a load that raced with a write can never repopulate stale data.
    /// Returns whether the entry was kept.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if `value` cannot be encoded
    pub fn put_versioned<T: Serialize + ?Sized>(
        &self,
        key: &CacheKey,
        value: &T,
        epoch: u64,
    ) -> AppResult<bool> {
        let scope = key.scope();
        if self.inner.epoch(&scope) != epoch {
            return Ok(false);
        }
        let rendered = key.to_string();
        let tick = self.insert(rendered.clone(), serde_json::to_vec(value)?);

        // An invalidation may have landed between the check and the insert
        if self.inner.epoch(&scope) != epoch {
            self.inner
                .entries
                .remove_if(&rendered, |_, entry| entry.tick == tick);
            return Ok(false);
        }
        self.inner.enforce_capacity();
        Ok(true)
    }

    /// Current invalidation epoch of `key`'s scope
    #[must_use]
    pub fn scope_epoch(&self, key: &CacheKey) -> u64 {
        self.inner.epoch(&key.scope())
    }

    /// Invalidation epoch of a discussion
    #[must_use]
    pub fn discussion_epoch(&self, discussion_id: &str) -> u64 {
        self.inner.epoch(&CacheKey::discussion_scope(discussion_id))
    }

    /// Return the cached value or load, cache and return it
    ///
    /// # Errors
    ///
    /// Returns the loader's error; nothing is cached in that case
    pub async fn get_or_load<T, F, Fut>(&self, key: &CacheKey, load: F) -> AppResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        match self.get::<T>(key) {
            Ok(Some(hit)) => return Ok(hit),
            Ok(None) => {}
            Err(e) => warn!(key = %key, error = %e, "Discarding undecodable cache entry"),
        }
        let epoch = self.scope_epoch(key);
        let value = load().await?;
        if let Err(e) = self.put_versioned(key, &value, epoch) {
            warn!(key = %key, error = %e, "Failed to cache loaded value");
        }
        Ok(value)
    }

    /// Remove one entry
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        let removed = self.inner.entries.remove(&key.to_string()).is_some();
        if removed {
            self.inner
                .counters
                .invalidations
                .fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    /// Remove every entry whose rendered key matches a glob pattern
    ///
    /// Patterns see ids as [`CacheKey`] renders them, with `:` as `%3A`.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid pattern
    pub fn invalidate_pattern(&self, pattern: &str) -> AppResult<u64> {
        let matcher = glob::Pattern::new(pattern)
            .map_err(|e| AppError::invalid_input(format!("Invalid glob pattern '{pattern}': {e}")))?;
        let mut removed = 0_u64;
        self.inner.entries.retain(|key, _| {
            let keep = !matcher.matches(key);
            if !keep {
                removed += 1;
            }
            keep
        });
        self.inner
            .counters
            .invalidations
            .fetch_add(removed, Ordering::Relaxed);
        Ok(removed)
    }

    /// Remove every entry derived from a discussion
    pub fn invalidate_discussion(&self, discussion_id: &str) -> u64 {
        let removed = self
            .inner
            .remove_scope(&CacheKey::discussion_scope(discussion_id));
        debug!(discussion_id, removed, "Invalidated discussion cache entries");
        removed
    }

    /// Remove every entry derived from an owner's listings
    pub fn invalidate_owner(&self, owner_id: &str) -> u64 {
        self.inner.remove_scope(&CacheKey::owner_scope(owner_id))
    }

    /// Whether a live entry exists for `key`
    #[must_use]
    pub fn exists(&self, key: &CacheKey) -> bool {
        let ttl = self.inner.config.ttl;
        self.inner
            .entries
            .get(&key.to_string())
            .is_some_and(|entry| !entry.is_expired(Instant::now(), ttl))
    }

    /// Time left before `key` expires
    #[must_use]
    pub fn ttl(&self, key: &CacheKey) -> Option<Duration> {
        let entry = self.inner.entries.get(&key.to_string())?;
        self.inner
            .config
            .ttl
            .checked_sub(entry.inserted_at.elapsed())
            .filter(|left| !left.is_zero())
    }

    /// Time since `key` was last read or written
    #[must_use]
    pub fn idle_time(&self, key: &CacheKey) -> Option<Duration> {
        self.inner
            .entries
            .get(&key.to_string())
            .map(|entry| entry.last_access.elapsed())
    }

    /// Scopes holding an invalidation record; the sweep retires records older than the TTL
    #[must_use]
    pub fn tracked_scopes(&self) -> usize {
        self.inner.epochs.len()
    }

    /// Number of stored entries, including expired ones not yet swept
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    /// Whether the cache holds no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Remove everything, including epoch records
    ///
    /// Every scope moves to a fresh epoch, so loads still in flight are not cached.
    pub fn clear_all(&self) {
        let inner = &self.inner;
        let epoch = inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        inner.epoch_floor.fetch_max(epoch, Ordering::AcqRel);
        inner.epochs.clear();
        inner.entries.clear();
    }

    /// Snapshot of counters
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let c = &self.inner.counters;
        CacheStats {
            entries: self.inner.entries.len(),
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            evictions: c.evictions.load(Ordering::Relaxed),
            expirations: c.expirations.load(Ordering::Relaxed),
            invalidations: c.invalidations.load(Ordering::Relaxed),
        }
    }

    /// Run one sweep now; returns (expired, evicted)
    pub fn sweep(&self) -> (u64, u64) {
        self.inner.sweep()
    }

    /// Whether the background sweep task is still running
    #[must_use]
    pub fn sweeper_running(&self) -> bool {
        self.inner
            .sweeper
            .lock()
            .ok()
            .and_then(|slot| slot.as_ref().map(|task| !task.is_finished()))
            .unwrap_or(false)
    }

    /// Stop the background sweep and wait for it to exit
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let task = self.inner.sweeper.lock().ok().and_then(|mut slot| slot.take());
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "Cache sweep task ended abnormally");
            }
        }
    }

    fn insert(&self, key: String, data: Vec<u8>) -> u64 {
        let now = Instant::now();
        let tick = self.inner.next_tick();
        self.inner.entries.insert(
            key,
            CacheEntry {
                data: data.into(),
                inserted_at: now,
                last_access: now,
                tick,
            },
        );
        tick
    }
}

async fn run_sweeper(cache: Weak<CacheInner>, shutdown: CancellationToken, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let Some(inner) = cache.upgrade() else { break };
                let (expired, evicted) = inner.sweep();
                drop(inner);
                if expired + evicted > 0 {
                    debug!(expired, evicted, "Cache sweep removed entries");
                }
            }
        }
    }
    debug!("Cache sweep task stopped");
}
