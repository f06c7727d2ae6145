pub mod cache;
pub mod config;
pub mod context;
pub mod core;
pub mod maintenance;
pub mod memory;

// Re-export commonly used types
pub use cache::{
    DiskCache, DiskStats, LruCache, LruStats, SmartCache, SmartCacheConfig, SmartCacheStats,
    cache_key,
};
pub use config::CacheConfig;
pub use context::{AllocationGuard, CacheContext};
pub use core::{CacheEntry, CacheError, CachePriority, Metadata, Result};
pub use maintenance::{MaintenanceConfig, MaintenanceTask};
pub use memory::{
    GovernorConfig, GovernorStats, HealthStatus, MemoryManager, MemoryMonitor, MemoryPriority,
    MemoryStats, MemoryStatus, MemoryTrend, TempFileTracker,
};
