//! Retrieval query cache: LRU with TTL, invalidated on any write in
//! scope.
//!
//! Purely an optimization. Because every write to a scope drops that
//! scope's entries, a cached ranking is always what a fresh retrieval
//! over the same frozen state would produce — determinism holds with or
//! without the cache.

use super::RetrievalResult;
use crate::types::Scope;
use lru::LruCache;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    scope: Scope,
    fingerprint: String,
}

struct CacheEntry {
    result: RetrievalResult,
    inserted_at: Instant,
}

/// Hit/miss counters.
#[derive(Debug, Default)]
pub struct QueryCacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
}

impl QueryCacheMetrics {
    /// Cache hits observed.
    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Cache misses observed.
    #[must_use]
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Scope invalidations performed.
    #[must_use]
    pub fn invalidations(&self) -> u64 {
        self.invalidations.load(Ordering::Relaxed)
    }
}

/// LRU + TTL cache over retrieval results.
pub struct QueryCache {
    entries: Mutex<LruCache<CacheKey, CacheEntry>>,
    ttl: Duration,
    metrics: QueryCacheMetrics,
    enabled: bool,
}

impl QueryCache {
    /// Cache with the given capacity and TTL; capacity 0 disables it.
    #[must_use]
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let enabled = capacity > 0;
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
            metrics: QueryCacheMetrics::default(),
            enabled,
        }
    }

    /// Key material for a (query, options) pair.
    #[must_use]
    pub fn fingerprint(query_text: &str, options_material: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(query_text.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(options_material.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Look up a cached result, honoring TTL.
    #[must_use]
    pub fn get(&self, scope: &Scope, fingerprint: &str) -> Option<RetrievalResult> {
        if !self.enabled {
            return None;
        }
        let key = CacheKey {
            scope: scope.clone(),
            fingerprint: fingerprint.to_string(),
        };
        let mut entries = self.entries.lock();
        match entries.get(&key) {
            Some(entry) if entry.inserted_at.elapsed() <= self.ttl => {
                self.metrics.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.result.clone())
            }
            Some(_) => {
                entries.pop(&key);
                self.metrics.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.metrics.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert a result.
    pub fn insert(&self, scope: &Scope, fingerprint: &str, result: RetrievalResult) {
        if !self.enabled {
            return;
        }
        let key = CacheKey {
            scope: scope.clone(),
            fingerprint: fingerprint.to_string(),
        };
        self.entries.lock().put(
            key,
            CacheEntry {
                result,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Drop every entry for a scope. Called on any write into it.
    pub fn invalidate_scope(&self, scope: &Scope) {
        if !self.enabled {
            return;
        }
        let mut entries = self.entries.lock();
        let stale: Vec<CacheKey> = entries
            .iter()
            .filter(|(key, _)| &key.scope == scope)
            .map(|(key, _)| key.clone())
            .collect();
        for key in stale {
            entries.pop(&key);
        }
        self.metrics.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    /// Counter access.
    #[must_use]
    pub fn metrics(&self) -> &QueryCacheMetrics {
        &self.metrics
    }
}
