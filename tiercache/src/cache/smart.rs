//! Tiered cache orchestration
//!
//! Front door over the memory and disk tiers: placement by serialized
//! size, opportunistic promotion on disk hits, tier-split statistics and
//! the pressure-driven aggressive cleanup used by the maintenance task.

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::disk::{DiskCache, DiskStats};
use super::lru::{LruCache, LruStats};
use crate::core::error::Result;
use crate::core::{CachePriority, Metadata};

const PRIORITY_METADATA_KEY: &str = "priority";

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct SmartCacheConfig {
    /// Memory tier capacity in entries
    pub memory_max_entries: usize,
    /// Disk tier byte budget
    pub disk_max_size_bytes: u64,
    /// Directory for the disk tier
    pub disk_directory: PathBuf,
    /// TTL applied when a put does not specify one
    pub default_ttl: Option<Duration>,
    /// Values at or below this serialized size go to the memory tier
    pub memory_value_threshold: usize,
    /// How long a pressure-halved memory capacity stays in effect
    pub capacity_restore_cooldown: Duration,
}

impl Default for SmartCacheConfig {
    fn default() -> Self {
        Self {
            memory_max_entries: 500,
            disk_max_size_bytes: 50 * 1024 * 1024,
            disk_directory: std::env::temp_dir().join("tiercache"),
            default_ttl: Some(Duration::from_secs(3600)),
            memory_value_threshold: 10 * 1024,
            capacity_restore_cooldown: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Default, Clone)]
struct TierCounters {
    total_requests: u64,
    memory_hits: u64,
    disk_hits: u64,
    misses: u64,
}

/// Capacity reduction in effect after an aggressive cleanup
struct PressureState {
    original_capacity: usize,
    restore_at: Instant,
}

/// Combined statistics across both tiers
#[derive(Debug, Clone, Serialize)]
pub struct SmartCacheStats {
    pub total_requests: u64,
    pub memory_hits: u64,
    pub disk_hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub memory_hit_rate: f64,
    pub disk_hit_rate: f64,
    pub memory: LruStats,
    pub disk: DiskStats,
}

/// Tiered cache: fast in-process tier plus persistent disk tier
pub struct SmartCache {
    memory: LruCache,
    disk: DiskCache,
    config: SmartCacheConfig,
    counters: Mutex<TierCounters>,
    pressure: Mutex<Option<PressureState>>,
}

impl SmartCache {
    pub fn new(config: SmartCacheConfig) -> Result<Self> {
        let memory = LruCache::new(config.memory_max_entries, config.default_ttl);
        let disk = DiskCache::new(config.disk_directory.clone(), config.disk_max_size_bytes)?;
        info!(
            "smart cache initialized: memory={} entries, disk={}MB at {}",
            config.memory_max_entries,
            config.disk_max_size_bytes / (1024 * 1024),
            config.disk_directory.display()
        );
        Ok(Self {
            memory,
            disk,
            config,
            counters: Mutex::new(TierCounters::default()),
            pressure: Mutex::new(None),
        })
    }

    /// Get a value, checking the memory tier first. A disk hit is
    /// opportunistically promoted into the memory tier (capacity
    /// permitting) carrying its remaining TTL.
    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.counters.lock().total_requests += 1;

        if let Some(value) = self.memory.get(key) {
            self.counters.lock().memory_hits += 1;
            return Some(value);
        }

        let disk_entry = self.disk.entry(key);
        if let Some(value) = self.disk.get(key) {
            self.counters.lock().disk_hits += 1;

            let (remaining_ttl, metadata) = disk_entry
                .map(|e| {
                    let now = DiskCache::unix_now();
                    (e.remaining_ttl(now), e.metadata)
                })
                .unwrap_or((None, Metadata::new()));
            let priority = priority_from_metadata(&metadata);
            self.memory
                .promote(key, value.clone(), remaining_ttl, priority, metadata);
            return Some(value);
        }

        self.counters.lock().misses += 1;
        None
    }

    /// Insert a value. Placement is by serialized size alone: small
    /// values go to the memory tier, large ones to disk. Priority only
    /// orders eviction within the memory tier.
    pub async fn put(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
        priority: CachePriority,
        mut metadata: Metadata,
    ) -> bool {
        metadata.insert(
            PRIORITY_METADATA_KEY.to_string(),
            priority_to_str(priority).to_string(),
        );

        if value.len() <= self.config.memory_value_threshold {
            self.memory.put(key, value, ttl, priority, metadata)
        } else {
            let effective_ttl = ttl.or(self.config.default_ttl);
            self.disk.put(key, &value, effective_ttl, metadata)
        }
    }

    /// Remove a key from both tiers
    pub async fn remove(&self, key: &str) -> bool {
        let memory_removed = self.memory.remove(key);
        let disk_removed = self.disk.remove(key);
        memory_removed || disk_removed
    }

    /// Clear both tiers and reset counters
    pub fn clear(&self) {
        self.memory.clear();
        self.disk.clear();
        *self.counters.lock() = TierCounters::default();
    }

    /// Drop expired entries on both tiers, returning the total removed
    pub fn cleanup_expired(&self) -> usize {
        self.memory.cleanup_expired() + self.disk.cleanup_expired()
    }

    /// Delete disk-tier backing files that lost their index entry
    pub fn sweep_orphans(&self) -> usize {
        self.disk.sweep_orphans()
    }

    /// Shed memory-tier load under memory pressure: halve the capacity,
    /// evict the coldest entries down to the new bound, and schedule the
    /// original capacity to return after the cooldown.
    pub fn aggressive_cleanup(&self) {
        let mut pressure = self.pressure.lock();
        let original = match pressure.as_ref() {
            Some(state) => state.original_capacity,
            None => self.memory.capacity(),
        };
        let reduced = (original / 2).max(50);
        self.memory.set_capacity(reduced);

        let excess = self.memory.len().saturating_sub(reduced);
        let evicted = if excess > 0 {
            self.memory.evict_coldest(excess)
        } else {
            0
        };

        *pressure = Some(PressureState {
            original_capacity: original,
            restore_at: Instant::now() + self.config.capacity_restore_cooldown,
        });
        warn!(
            "aggressive cache cleanup: capacity {} -> {}, evicted {}",
            original, reduced, evicted
        );
    }

    /// Restore the memory-tier capacity once the pressure cooldown has
    /// elapsed. Called from the maintenance tick.
    pub fn maybe_restore_capacity(&self) {
        let mut pressure = self.pressure.lock();
        if let Some(state) = pressure.as_ref() {
            if Instant::now() >= state.restore_at {
                self.memory.set_capacity(state.original_capacity);
                info!(
                    "memory tier capacity restored to {}",
                    state.original_capacity
                );
                *pressure = None;
            }
        }
    }

    /// Typed insert: the value is encoded with bincode before placement
    pub async fn put_value<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
        priority: CachePriority,
    ) -> bool {
        match bincode::serialize(value) {
            Ok(bytes) => self.put(key, bytes, ttl, priority, Metadata::new()).await,
            Err(e) => {
                warn!("could not serialize value for {}: {}", key, e);
                false
            }
        }
    }

    /// Typed lookup. A value that no longer decodes is dropped and
    /// reported as a miss.
    pub async fn get_value<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let bytes = self.get(key).await?;
        match bincode::deserialize(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("cached value for {} no longer decodes: {}", key, e);
                self.remove(key).await;
                None
            }
        }
    }

    /// Memoize an expensive operation under `key`.
    ///
    /// `compute` runs only on a miss. A `None` result is never cached, so
    /// operations that validly produce no value re-execute instead of
    /// being short-circuited.
    pub async fn get_or_compute<T, F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        priority: CachePriority,
        compute: F,
    ) -> Option<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Option<T>>,
    {
        if let Some(value) = self.get_value(key).await {
            debug!("memoized hit for {}", key);
            return Some(value);
        }

        let result = compute().await?;
        self.put_value(key, &result, ttl, priority).await;
        Some(result)
    }

    pub fn stats(&self) -> SmartCacheStats {
        let counters = self.counters.lock().clone();
        let total = counters.total_requests;
        let rate = |hits: u64| {
            if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64 * 100.0
            }
        };
        SmartCacheStats {
            total_requests: total,
            memory_hits: counters.memory_hits,
            disk_hits: counters.disk_hits,
            misses: counters.misses,
            hit_rate: rate(counters.memory_hits + counters.disk_hits),
            memory_hit_rate: rate(counters.memory_hits),
            disk_hit_rate: rate(counters.disk_hits),
            memory: self.memory.stats(),
            disk: self.disk.stats(),
        }
    }

    /// Live presence in the memory tier, without counting a lookup
    pub fn in_memory_tier(&self, key: &str) -> bool {
        self.memory.contains_key(key)
    }

    pub fn memory_capacity(&self) -> usize {
        self.memory.capacity()
    }
}

fn priority_to_str(priority: CachePriority) -> &'static str {
    match priority {
        CachePriority::High => "high",
        CachePriority::Normal => "normal",
        CachePriority::Low => "low",
    }
}

fn priority_from_metadata(metadata: &Metadata) -> CachePriority {
    match metadata.get(PRIORITY_METADATA_KEY).map(String::as_str) {
        Some("high") => CachePriority::High,
        Some("low") => CachePriority::Low,
        _ => CachePriority::Normal,
    }
}
