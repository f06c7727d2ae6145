//! Memory-tier LRU cache
//!
//! Bounded in-process key/value tier with per-entry TTL. Eviction on
//! insert is pure recency; priority only matters to `evict_coldest`,
//! which the orchestrator uses under memory pressure.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tracing::debug;

use crate::core::{CacheEntry, CachePriority, Metadata};

/// Memory tier statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct LruStats {
    pub entries: usize,
    pub max_entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expired_removals: u64,
}

impl LruStats {
    /// Hit rate over all lookups, in percent
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64 * 100.0
        }
    }
}

struct LruInner {
    entries: HashMap<String, CacheEntry>,
    /// LRU ordering, most recent at the back
    order: VecDeque<String>,
    max_entries: usize,
    default_ttl: Option<Duration>,
    stats: LruStats,
}

impl LruInner {
    fn mark_recent(&mut self, key: &str) {
        self.order.retain(|k| k != key);
        self.order.push_back(key.to_string());
    }

    fn remove_entry(&mut self, key: &str) -> Option<CacheEntry> {
        let removed = self.entries.remove(key);
        if removed.is_some() {
            self.order.retain(|k| k != key);
        }
        removed
    }
}

/// Bounded LRU cache with per-entry TTL
pub struct LruCache {
    inner: Mutex<LruInner>,
}

impl LruCache {
    pub fn new(max_entries: usize, default_ttl: Option<Duration>) -> Self {
        Self {
            inner: Mutex::new(LruInner {
                entries: HashMap::new(),
                order: VecDeque::new(),
                max_entries,
                default_ttl,
                stats: LruStats::default(),
            }),
        }
    }

    /// Get a value, marking the entry most-recently-used.
    ///
    /// An expired entry is removed in place and counted as a miss.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let mut inner = self.inner.lock();

        let expired = match inner.entries.get(key) {
            Some(entry) => entry.is_expired(),
            None => {
                inner.stats.misses += 1;
                return None;
            }
        };

        if expired {
            inner.remove_entry(key);
            inner.stats.expired_removals += 1;
            inner.stats.misses += 1;
            debug!("memory tier expired on access: {}", key);
            return None;
        }

        let value = inner.entries.get_mut(key).map(|entry| {
            entry.touch();
            entry.value.clone()
        });
        inner.mark_recent(key);
        inner.stats.hits += 1;
        value
    }

    /// Insert a value.
    ///
    /// Replacing an existing key refreshes recency without evicting; a new
    /// key at capacity evicts the single least-recently-used entry first.
    pub fn put(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
        priority: CachePriority,
        metadata: Metadata,
    ) -> bool {
        let mut inner = self.inner.lock();
        let effective_ttl = ttl.or(inner.default_ttl);
        let entry = CacheEntry::new(key.to_string(), value, effective_ttl, priority, metadata);

        if inner.entries.contains_key(key) {
            inner.entries.insert(key.to_string(), entry);
            inner.mark_recent(key);
            return true;
        }

        while inner.entries.len() >= inner.max_entries {
            let Some(victim) = inner.order.pop_front() else {
                break;
            };
            inner.entries.remove(&victim);
            inner.stats.evictions += 1;
            debug!("memory tier evicted: {}", victim);
        }

        inner.entries.insert(key.to_string(), entry);
        inner.order.push_back(key.to_string());
        true
    }

    /// Insert only when below capacity. Used for advisory promotion from
    /// the disk tier; declines silently when the tier is full.
    pub fn promote(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
        priority: CachePriority,
        metadata: Metadata,
    ) -> bool {
        let mut inner = self.inner.lock();
        if inner.entries.len() >= inner.max_entries && !inner.entries.contains_key(key) {
            debug!("memory tier full, skipping promotion of {}", key);
            return false;
        }
        let entry = CacheEntry::new(key.to_string(), value, ttl, priority, metadata);
        inner.entries.insert(key.to_string(), entry);
        inner.mark_recent(key);
        true
    }

    pub fn remove(&self, key: &str) -> bool {
        let mut inner = self.inner.lock();
        inner.remove_entry(key).is_some()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.order.clear();
        inner.stats = LruStats::default();
    }

    /// Remove all expired entries, returning how many were dropped
    pub fn cleanup_expired(&self) -> usize {
        let mut inner = self.inner.lock();
        let expired: Vec<String> = inner
            .entries
            .values()
            .filter(|e| e.is_expired())
            .map(|e| e.key.clone())
            .collect();

        for key in &expired {
            inner.remove_entry(key);
            inner.stats.expired_removals += 1;
        }

        if !expired.is_empty() {
            debug!("memory tier dropped {} expired entries", expired.len());
        }
        expired.len()
    }

    /// Evict up to `count` entries, coldest first: ascending priority,
    /// then ascending access count. Returns how many were removed.
    pub fn evict_coldest(&self, count: usize) -> usize {
        let mut inner = self.inner.lock();
        let mut candidates: Vec<(String, CachePriority, u64)> = inner
            .entries
            .values()
            .map(|e| (e.key.clone(), e.priority, e.access_count))
            .collect();
        candidates.sort_by_key(|(_, priority, access_count)| (*priority, *access_count));

        let mut removed = 0;
        for (key, _, _) in candidates.into_iter().take(count) {
            inner.remove_entry(&key);
            inner.stats.evictions += 1;
            removed += 1;
        }
        removed
    }

    /// Check for a live (non-expired) entry without touching access state
    pub fn contains_key(&self, key: &str) -> bool {
        let inner = self.inner.lock();
        inner.entries.get(key).is_some_and(|e| !e.is_expired())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().max_entries
    }

    /// Change the capacity bound. Does not evict by itself; callers pair
    /// this with `evict_coldest` when shrinking.
    pub fn set_capacity(&self, max_entries: usize) {
        self.inner.lock().max_entries = max_entries;
    }

    pub fn stats(&self) -> LruStats {
        let inner = self.inner.lock();
        let mut stats = inner.stats.clone();
        stats.entries = inner.entries.len();
        stats.max_entries = inner.max_entries;
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(max: usize) -> LruCache {
        LruCache::new(max, None)
    }

    #[test]
    fn test_put_get_roundtrip() {
        let c = cache(10);
        assert!(c.put("k", vec![1, 2, 3], None, CachePriority::Normal, Metadata::new()));
        assert_eq!(c.get("k"), Some(vec![1, 2, 3]));

        let stats = c.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 0);
    }

    #[test]
    fn test_miss_recorded() {
        let c = cache(10);
        assert!(c.get("absent").is_none());
        assert_eq!(c.stats().misses, 1);
    }

    #[test]
    fn test_capacity_evicts_first_inserted() {
        let c = cache(3);
        for key in ["a", "b", "c"] {
            c.put(key, vec![0; 64], None, CachePriority::Normal, Metadata::new());
        }
        // Fourth insert with no intervening access evicts "a" regardless of size
        c.put("d", vec![0], None, CachePriority::Normal, Metadata::new());

        assert!(c.get("a").is_none());
        assert!(c.get("b").is_some());
        assert!(c.get("c").is_some());
        assert!(c.get("d").is_some());
        assert_eq!(c.stats().evictions, 1);
    }

    #[test]
    fn test_access_refreshes_recency() {
        let c = cache(3);
        c.put("a", vec![1], None, CachePriority::Normal, Metadata::new());
        c.put("b", vec![2], None, CachePriority::Normal, Metadata::new());
        c.put("c", vec![3], None, CachePriority::Normal, Metadata::new());

        // Touch "a" so "b" becomes the LRU victim
        assert_eq!(c.get("a"), Some(vec![1]));
        c.put("d", vec![4], None, CachePriority::Normal, Metadata::new());

        assert!(c.get("b").is_none());
        assert_eq!(c.get("a"), Some(vec![1]));
        assert_eq!(c.get("c"), Some(vec![3]));
        assert_eq!(c.get("d"), Some(vec![4]));
    }

    #[test]
    fn test_replacing_put_does_not_evict() {
        let c = cache(2);
        c.put("a", vec![1], None, CachePriority::Normal, Metadata::new());
        c.put("b", vec![2], None, CachePriority::Normal, Metadata::new());
        c.put("a", vec![9], None, CachePriority::Normal, Metadata::new());

        assert_eq!(c.len(), 2);
        assert_eq!(c.get("a"), Some(vec![9]));
        assert_eq!(c.get("b"), Some(vec![2]));
        assert_eq!(c.stats().evictions, 0);
    }

    #[test]
    fn test_expired_entry_purged_on_access() {
        let c = cache(10);
        c.put(
            "short",
            vec![1],
            Some(Duration::from_millis(10)),
            CachePriority::Normal,
            Metadata::new(),
        );
        std::thread::sleep(Duration::from_millis(25));

        assert!(c.get("short").is_none());
        let stats = c.stats();
        assert_eq!(stats.expired_removals, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 0, "expired entry purged from bookkeeping");
    }

    #[test]
    fn test_cleanup_expired() {
        let c = cache(10);
        c.put("keep", vec![1], None, CachePriority::Normal, Metadata::new());
        c.put(
            "drop1",
            vec![2],
            Some(Duration::from_millis(5)),
            CachePriority::Normal,
            Metadata::new(),
        );
        c.put(
            "drop2",
            vec![3],
            Some(Duration::from_millis(5)),
            CachePriority::Normal,
            Metadata::new(),
        );
        std::thread::sleep(Duration::from_millis(20));

        assert_eq!(c.cleanup_expired(), 2);
        assert_eq!(c.len(), 1);
        assert!(c.contains_key("keep"));
    }

    #[test]
    fn test_promote_declines_when_full() {
        let c = cache(2);
        c.put("a", vec![1], None, CachePriority::Normal, Metadata::new());
        c.put("b", vec![2], None, CachePriority::Normal, Metadata::new());

        assert!(!c.promote("c", vec![3], None, CachePriority::Normal, Metadata::new()));
        assert!(!c.contains_key("c"));
        // Existing keys can still be refreshed
        assert!(c.promote("a", vec![9], None, CachePriority::Normal, Metadata::new()));
    }

    #[test]
    fn test_evict_coldest_orders_by_priority_then_access() {
        let c = cache(10);
        c.put("hot", vec![1], None, CachePriority::High, Metadata::new());
        c.put("warm", vec![2], None, CachePriority::Normal, Metadata::new());
        c.put("cold", vec![3], None, CachePriority::Low, Metadata::new());
        // "warm" gets accesses, "cold" none
        c.get("warm");
        c.get("hot");

        assert_eq!(c.evict_coldest(2), 2);
        assert!(c.contains_key("hot"), "high priority survives");
        assert!(!c.contains_key("cold"));
        assert!(!c.contains_key("warm"));
    }

    #[test]
    fn test_default_ttl_applied() {
        let c = LruCache::new(10, Some(Duration::from_millis(10)));
        c.put("k", vec![1], None, CachePriority::Normal, Metadata::new());
        std::thread::sleep(Duration::from_millis(25));
        assert!(c.get("k").is_none());
    }

    #[test]
    fn test_clear_resets_stats() {
        let c = cache(10);
        c.put("k", vec![1], None, CachePriority::Normal, Metadata::new());
        c.get("k");
        c.get("missing");
        c.clear();

        let stats = c.stats();
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
    }
}
