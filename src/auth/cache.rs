//! Verification result cache with TTL expiry and LRU eviction
//!
//! Protects remote verification calls (introspection, custom endpoints) from
//! being repeated for the same credential inside the TTL window.
//!
//! Keys are `base64(SHA-256(credential))`; the raw credential is never stored.
//! Lookups take a `DashMap` shard read lock and bump an atomic recency stamp.
//! Inserts and evictions are serialized by a single mutex that readers never
//! touch.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use base64::Engine;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::{Error, Result};

/// A result type that knows whether it represents a success.
///
/// [`TokenCache::get_or_verify`] only stores successful verdicts, so a revoked
/// credential is always re-checked instead of a failure being remembered.
pub trait Verdict {
    /// Whether this result should be considered a success
    fn is_success(&self) -> bool;
}

struct CacheEntry<T> {
    result: T,
    expires_at: Instant,
    /// Recency stamp from the cache's logical clock; larger is more recent
    last_access: AtomicU64,
}

impl<T> CacheEntry<T> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    fn touch(&self, stamp: u64) {
        self.last_access.fetch_max(stamp, Ordering::Relaxed);
    }

    fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }
}

/// Cache statistics tracked atomically
#[derive(Debug, Default)]
struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl CacheStats {
    #[allow(clippy::cast_precision_loss)]
    fn hit_rate(hits: u64, misses: u64) -> f64 {
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

/// Snapshot of cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatsSnapshot {
    /// Lookups served from the cache
    pub hits: u64,
    /// Lookups that fell through to verification
    pub misses: u64,
    /// Entries removed by LRU eviction
    pub evictions: u64,
    /// Entries removed because their TTL elapsed
    pub expirations: u64,
    /// Current number of entries
    pub size: usize,
    /// Hit rate (0.0-1.0)
    pub hit_rate: f64,
}

/// Thread-safe TTL + LRU cache of verification results
pub struct TokenCache<T> {
    entries: DashMap<String, CacheEntry<T>>,
    ttl: Duration,
    max_size: usize,
    /// Serializes the capacity check, eviction and insert
    write_lock: Mutex<()>,
    clock: AtomicU64,
    stats: CacheStats,
}

impl<T> std::fmt::Debug for TokenCache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCache")
            .field("ttl", &self.ttl)
            .field("max_size", &self.max_size)
            .field("size", &self.entries.len())
            .finish_non_exhaustive()
    }
}

impl<T: Clone + Send + Sync> TokenCache<T> {
    /// Create a cache.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `ttl` or `max_size` is zero.
    pub fn new(ttl: Duration, max_size: usize) -> Result<Self> {
        if ttl.is_zero() {
            return Err(Error::InvalidArgument(
                "cache TTL must be greater than zero".to_string(),
            ));
        }
        if max_size == 0 {
            return Err(Error::InvalidArgument(
                "cache max size must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            entries: DashMap::new(),
            ttl,
            max_size,
            write_lock: Mutex::new(()),
            clock: AtomicU64::new(0),
            stats: CacheStats::default(),
        })
    }

    /// Derive the cache key for a raw credential
    #[must_use]
    pub fn cache_key(raw_token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(raw_token.as_bytes());
        let digest = hasher.finalize();
        base64::engine::general_purpose::STANDARD.encode(digest.as_slice())
    }

    /// Return the live cached result for `raw_token`, or run `validate` and
    /// cache its result when `should_cache` accepts it.
    ///
    /// Concurrent misses on the same credential each run `validate`; the last
    /// insert wins.
    pub async fn get_or_validate<F, Fut, P>(&self, raw_token: &str, validate: F, should_cache: P) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
        P: FnOnce(&T) -> bool,
    {
        let key = Self::cache_key(raw_token);
        if let Some(hit) = self.lookup(&key) {
            return hit;
        }

        let result = validate().await;
        if should_cache(&result) {
            self.insert(key, result.clone());
        }
        result
    }

    /// Like [`get_or_validate`](Self::get_or_validate), caching only successful verdicts
    pub async fn get_or_verify<F, Fut>(&self, raw_token: &str, validate: F) -> T
    where
        T: Verdict,
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.get_or_validate(raw_token, validate, T::is_success)
            .await
    }

    fn next_stamp(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn lookup(&self, key: &str) -> Option<T> {
        let now = Instant::now();
        let Some(entry) = self.entries.get(key) else {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        if entry.is_expired(now) {
            drop(entry);
            if self
                .entries
                .remove_if(key, |_, e| e.is_expired(now))
                .is_some()
            {
                self.stats.expirations.fetch_add(1, Ordering::Relaxed);
            }
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            debug!(key_prefix = %&key[..8], "Cached verdict expired");
            return None;
        }

        entry.touch(self.next_stamp());
        self.stats.hits.fetch_add(1, Ordering::Relaxed);
        Some(entry.result.clone())
    }

    fn insert(&self, key: String, result: T) {
        let _guard = self.write_lock.lock();

        if self.entries.len() >= self.max_size && !self.entries.contains_key(&key) {
            self.make_room();
        }

        let entry = CacheEntry {
            result,
            expires_at: Instant::now() + self.ttl,
            last_access: AtomicU64::new(self.next_stamp()),
        };
        self.entries.insert(key, entry);
    }

    /// Free at least one slot. Caller holds `write_lock`.
    fn make_room(&self) {
        self.cleanup_expired();

        let len = self.entries.len();
        if len < self.max_size {
            return;
        }

        let excess = len - self.max_size + 1;
        let mut by_recency: Vec<(u64, String)> = self
            .entries
            .iter()
            .map(|entry| (entry.value().last_access(), entry.key().clone()))
            .collect();
        by_recency.sort_unstable_by_key(|(stamp, _)| *stamp);

        let mut evicted = 0_u64;
        for (_, key) in by_recency.into_iter().take(excess) {
            if self.entries.remove(&key).is_some() {
                evicted += 1;
            }
        }
        self.stats.evictions.fetch_add(evicted, Ordering::Relaxed);
        debug!(evicted, max_size = self.max_size, "Evicted least recently used verdicts");
    }

    /// Remove all expired entries, returning how many were removed
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.value().is_expired(now))
            .map(|entry| entry.key().clone())
            .collect();

        let removed = expired
            .iter()
            .filter(|key| {
                self.entries
                    .remove_if(key.as_str(), |_, e| e.is_expired(now))
                    .is_some()
            })
            .count();

        if removed > 0 {
            self.stats
                .expirations
                .fetch_add(removed as u64, Ordering::Relaxed);
        }
        removed
    }

    /// Drop every entry
    pub fn clear(&self) {
        let _guard = self.write_lock.lock();
        self.entries.clear();
    }

    /// Number of stored entries (including not-yet-swept expired ones)
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Configured TTL
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Configured capacity
    #[must_use]
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Current statistics
    pub fn stats(&self) -> CacheStatsSnapshot {
        let hits = self.stats.hits.load(Ordering::Relaxed);
        let misses = self.stats.misses.load(Ordering::Relaxed);
        CacheStatsSnapshot {
            hits,
            misses,
            evictions: self.stats.evictions.load(Ordering::Relaxed),
            expirations: self.stats.expirations.load(Ordering::Relaxed),
            size: self.entries.len(),
            hit_rate: CacheStats::hit_rate(hits, misses),
        }
    }

    #[cfg(test)]
    fn contains(&self, raw_token: &str) -> bool {
        self.entries.contains_key(&Self::cache_key(raw_token))
    }
}
