//! In-memory, cost-bounded LRU rendition cache.

use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, trace};

use crate::domain::entities::{RenditionRecord, RenditionSource, RequestKey};
use crate::domain::ports::RenditionCachePort;

/// Default memory budget in bytes (64 MB).
pub const DEFAULT_MEMORY_BUDGET: u64 = 64 * 1024 * 1024;

struct CostedLru {
    entries: LruCache<RequestKey, RenditionRecord>,
    total_cost: u64,
}

/// In-memory LRU cache for decoded renditions, bounded by total cost
/// (pixel area times bytes per pixel) rather than entry count.
/// Thread-safe; every operation takes one short-lived lock.
pub struct MemoryRenditionCache {
    inner: Mutex<CostedLru>,
    budget: u64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryRenditionCache {
    /// Creates a new cache with the given cost budget in bytes.
    #[must_use]
    pub fn new(budget: u64) -> Self {
        Self {
            inner: Mutex::new(CostedLru {
                entries: LruCache::unbounded(),
                total_cost: 0,
            }),
            budget,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Creates a new cache with the default budget.
    #[must_use]
    pub fn with_default_budget() -> Self {
        Self::new(DEFAULT_MEMORY_BUDGET)
    }

    /// Configured budget in bytes.
    #[must_use]
    pub const fn budget(&self) -> u64 {
        self.budget
    }

    /// Sum of the costs of all cached renditions.
    #[must_use]
    pub fn total_cost(&self) -> u64 {
        self.inner.lock().total_cost
    }

    /// Peeks at a rendition without promoting it in the LRU.
    #[must_use]
    pub fn peek(&self, key: &RequestKey) -> Option<RenditionRecord> {
        let inner = self.inner.lock();
        inner
            .entries
            .peek(key)
            .map(|record| record.with_source(RenditionSource::Memory))
    }

    /// Returns true if `key` is cached, without promoting it.
    #[must_use]
    pub fn contains(&self, key: &RequestKey) -> bool {
        self.inner.lock().entries.contains(key)
    }

    /// Returns cache statistics.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        let inner = self.inner.lock();
        CacheStats {
            hits,
            misses,
            hit_rate,
            size: inner.entries.len(),
            cost: inner.total_cost,
            budget: self.budget,
        }
    }
}

impl Default for MemoryRenditionCache {
    fn default() -> Self {
        Self::with_default_budget()
    }
}

/// Statistics about cache performance.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Hit rate as a percentage.
    pub hit_rate: f64,
    /// Current number of cached renditions.
    pub size: usize,
    /// Current total cost in bytes.
    pub cost: u64,
    /// Cost budget in bytes.
    pub budget: u64,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Cache: {} renditions, {}/{} bytes, {:.1}% hit rate ({} hits, {} misses)",
            self.size, self.cost, self.budget, self.hit_rate, self.hits, self.misses
        )
    }
}

impl RenditionCachePort for MemoryRenditionCache {
    fn get(&self, key: &RequestKey) -> Option<RenditionRecord> {
        let mut inner = self.inner.lock();
        if let Some(record) = inner.entries.get(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "Memory cache hit");
            Some(record.with_source(RenditionSource::Memory))
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "Memory cache miss");
            None
        }
    }

    fn put(&self, key: RequestKey, record: RenditionRecord) -> bool {
        let cost = record.cost();
        if cost > self.budget {
            debug!(key = %key, cost, budget = self.budget, "Rendition exceeds memory budget, not cached");
            return false;
        }

        let mut inner = self.inner.lock();
        if let Some(previous) = inner.entries.put(key.clone(), record) {
            inner.total_cost -= previous.cost();
        }
        inner.total_cost += cost;

        let mut evicted = 0usize;
        while inner.total_cost > self.budget {
            let Some((_, old)) = inner.entries.pop_lru() else {
                break;
            };
            inner.total_cost -= old.cost();
            evicted += 1;
        }

        debug!(key = %key, cost, total = inner.total_cost, evicted, "Stored rendition in memory cache");
        true
    }

    fn evict(&self, key: &RequestKey) {
        let mut inner = self.inner.lock();
        if let Some(old) = inner.entries.pop(key) {
            inner.total_cost -= old.cost();
            debug!(key = %key, "Evicted rendition from memory cache");
        }
    }

    fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.total_cost = 0;
        debug!("Cleared memory rendition cache");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::domain::entities::{CacheKey, DisplayScale, PointSize};

    fn key(name: &str) -> RequestKey {
        RequestKey::new(CacheKey::new(name), PointSize::new(10.0, 10.0), DisplayScale::ONE)
    }

    /// RGBA rendition costing `side * side * 4` bytes.
    fn record(side: u32) -> RenditionRecord {
        RenditionRecord::new(
            Arc::new(image::DynamicImage::new_rgba8(side, side)),
            RenditionSource::Processed,
        )
    }

    #[test]
    fn test_cache_put_and_get() {
        let cache = MemoryRenditionCache::new(1024 * 1024);
        let id = key("test1");

        assert!(cache.put(id.clone(), record(100)));
        let retrieved = cache.get(&id).unwrap();

        assert_eq!(retrieved.size.width, 100);
        assert_eq!(retrieved.source, RenditionSource::Memory);
    }

    #[test]
    fn test_cache_miss() {
        let cache = MemoryRenditionCache::new(1024);
        assert!(cache.get(&key("nonexistent")).is_none());
    }

    #[test]
    fn test_keys_differ_by_size() {
        let cache = MemoryRenditionCache::new(1024 * 1024);
        let small = key("same");
        let large = RequestKey::new(CacheKey::new("same"), PointSize::new(20.0, 20.0), DisplayScale::ONE);

        cache.put(small.clone(), record(10));
        assert!(cache.get(&small).is_some());
        assert!(cache.get(&large).is_none());
    }

    #[test]
    fn test_cost_eviction_drops_least_recently_used() {
        // Each record costs 400 bytes; budget fits two.
        let cache = MemoryRenditionCache::new(800);

        cache.put(key("a"), record(10));
        cache.put(key("b"), record(10));
        // Touch "a" so "b" becomes the LRU entry.
        assert!(cache.get(&key("a")).is_some());
        cache.put(key("c"), record(10));

        assert!(cache.peek(&key("b")).is_none());
        assert!(cache.peek(&key("a")).is_some());
        assert!(cache.peek(&key("c")).is_some());
        assert_eq!(cache.total_cost(), 800);
    }

    #[test]
    fn test_large_insert_evicts_several() {
        let cache = MemoryRenditionCache::new(1600);
        for name in ["a", "b", "c", "d"] {
            cache.put(key(name), record(10));
        }
        // 16x16x4 = 1024 bytes: three small entries must go.
        cache.put(key("big"), record(16));

        assert_eq!(cache.len(), 2);
        assert!(cache.peek(&key("d")).is_some());
        assert!(cache.peek(&key("big")).is_some());
        assert_eq!(cache.total_cost(), 1424);
    }

    #[test]
    fn test_oversized_entry_is_rejected() {
        let cache = MemoryRenditionCache::new(100);
        assert!(!cache.put(key("huge"), record(10)));
        assert!(cache.is_empty());
        assert!(cache.get(&key("huge")).is_none());
    }

    #[test]
    fn test_replacing_entry_updates_cost() {
        let cache = MemoryRenditionCache::new(10_000);
        cache.put(key("a"), record(10));
        cache.put(key("a"), record(20));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.total_cost(), 1600);

        cache.evict(&key("a"));
        assert_eq!(cache.total_cost(), 0);
    }

    #[test]
    fn test_cache_stats() {
        let cache = MemoryRenditionCache::new(10_000);
        let id = key("test1");
        cache.put(id.clone(), record(10));

        let _ = cache.get(&id);
        let _ = cache.get(&key("missing"));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 1);
        assert_eq!(stats.cost, 400);
    }

    #[test]
    fn test_peek_does_not_promote() {
        let cache = MemoryRenditionCache::new(800);

        cache.put(key("test1"), record(10));
        cache.put(key("test2"), record(10));
        let _ = cache.peek(&key("test1"));
        cache.put(key("test3"), record(10));

        assert!(cache.peek(&key("test1")).is_none());
    }

    #[test]
    fn test_clear_resets_cost() {
        let cache = MemoryRenditionCache::new(10_000);
        cache.put(key("a"), record(10));
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.total_cost(), 0);
    }
}
