use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Open key/value annotations attached to a cache entry
pub type Metadata = HashMap<String, String>;

/// Priority of a cached value inside the memory tier.
///
/// Only affects eviction ordering during aggressive cleanup; placement
/// between tiers is decided by value size alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CachePriority {
    /// Evicted first under pressure
    Low,
    #[default]
    Normal,
    /// Evicted last under pressure
    High,
}

/// In-memory cache entry with access metadata
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Cache key
    pub key: String,
    /// Serialized value
    pub value: Vec<u8>,
    /// When the entry was created
    pub created_at: Instant,
    /// Last access time (for LRU)
    pub last_accessed: Instant,
    /// Number of reads since creation
    pub access_count: u64,
    /// Optional time-to-live, relative to `created_at`
    pub ttl: Option<Duration>,
    /// Size of key + value in bytes
    pub size_bytes: usize,
    /// Eviction-ordering priority within the memory tier
    pub priority: CachePriority,
    /// Caller-supplied annotations
    pub metadata: Metadata,
}

impl CacheEntry {
    pub fn new(
        key: String,
        value: Vec<u8>,
        ttl: Option<Duration>,
        priority: CachePriority,
        metadata: Metadata,
    ) -> Self {
        let now = Instant::now();
        let size_bytes = key.len() + value.len();
        Self {
            key,
            value,
            created_at: now,
            last_accessed: now,
            access_count: 0,
            ttl,
            size_bytes,
            priority,
            metadata,
        }
    }

    /// Check if the entry has outlived its TTL
    pub fn is_expired(&self) -> bool {
        self.ttl.is_some_and(|ttl| self.created_at.elapsed() > ttl)
    }

    /// Age of the entry since creation
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// TTL remaining from now, if any. `None` means no expiry.
    pub fn remaining_ttl(&self) -> Option<Duration> {
        self.ttl
            .map(|ttl| ttl.saturating_sub(self.created_at.elapsed()))
    }

    /// Record a read access
    pub fn touch(&mut self) {
        self.last_accessed = Instant::now();
        self.access_count += 1;
    }
}
