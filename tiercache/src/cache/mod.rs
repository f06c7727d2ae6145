//! Tiered cache: an in-process LRU tier backed by a persistent disk tier

pub mod disk;
pub mod keys;
pub mod lru;
pub mod smart;

pub use disk::{DiskCache, DiskIndexEntry, DiskStats};
pub use keys::cache_key;
pub use lru::{LruCache, LruStats};
pub use smart::{SmartCache, SmartCacheConfig, SmartCacheStats};
