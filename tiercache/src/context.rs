//! Shared cache context
//!
//! Bundles the tiered cache, the memory governor and the maintenance
//! task behind one handle that the embedding application clones around.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{SmartCache, SmartCacheStats};
use crate::config::CacheConfig;
use crate::core::{CachePriority, Metadata, Result};
use crate::maintenance::{MaintenanceConfig, MaintenanceTask};
use crate::memory::{
    CleanupFn, GovernorStats, MemoryManager, MemoryPriority, MemoryStatus, TrackedObject,
};

/// Application-facing handle over the cache and governor
#[derive(Clone)]
pub struct CacheContext {
    cache: Arc<SmartCache>,
    governor: Arc<MemoryManager>,
    maintenance: Arc<Mutex<Option<MaintenanceTask>>>,
    maintenance_config: MaintenanceConfig,
}

impl CacheContext {
    /// Build a context from configuration. The maintenance task is not
    /// started until [`start_maintenance`](Self::start_maintenance).
    pub fn new(config: CacheConfig) -> Result<Self> {
        let cache = Arc::new(SmartCache::new(config.to_smart_cache_config())?);
        let governor = Arc::new(MemoryManager::new(config.to_governor_config()));
        Ok(Self {
            cache,
            governor,
            maintenance: Arc::new(Mutex::new(None)),
            maintenance_config: config.to_maintenance_config(),
        })
    }

    /// Build from pre-constructed components (used by tests to inject a
    /// deterministic governor).
    pub fn from_parts(
        cache: Arc<SmartCache>,
        governor: Arc<MemoryManager>,
        maintenance_config: MaintenanceConfig,
    ) -> Self {
        Self {
            cache,
            governor,
            maintenance: Arc::new(Mutex::new(None)),
            maintenance_config,
        }
    }

    pub fn cache(&self) -> &Arc<SmartCache> {
        &self.cache
    }

    pub fn governor(&self) -> &Arc<MemoryManager> {
        &self.governor
    }

    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.cache.get(key).await
    }

    pub async fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> bool {
        self.cache
            .put(key, value, ttl, CachePriority::Normal, Metadata::new())
            .await
    }

    pub async fn remove(&self, key: &str) -> bool {
        self.cache.remove(key).await
    }

    pub fn clear(&self) {
        self.cache.clear();
    }

    pub fn stats(&self) -> SmartCacheStats {
        self.cache.stats()
    }

    pub fn governor_stats(&self) -> GovernorStats {
        self.governor.stats()
    }

    pub fn memory_status(&self) -> MemoryStatus {
        self.governor.status()
    }

    /// Track an allocation against the governor budget. `false` is the
    /// backpressure signal: the caller must not proceed with the work.
    pub fn track_allocation(
        &self,
        id: &str,
        size_mb: f64,
        priority: MemoryPriority,
        cleanup: Option<CleanupFn>,
        object: Option<&TrackedObject>,
    ) -> bool {
        self.governor
            .track_allocation(id, size_mb, priority, cleanup, object)
    }

    pub fn release_allocation(&self, id: &str) -> bool {
        self.governor.release_allocation(id)
    }

    /// Track an allocation with scoped release: the returned guard
    /// releases it on drop. `None` means the request was refused.
    pub fn allocation_scope(
        &self,
        id: &str,
        size_mb: f64,
        priority: MemoryPriority,
    ) -> Option<AllocationGuard> {
        if self
            .governor
            .track_allocation(id, size_mb, priority, None, None)
        {
            Some(AllocationGuard {
                governor: self.governor.clone(),
                id: id.to_string(),
            })
        } else {
            None
        }
    }

    /// Start the background maintenance task. A second call while one is
    /// already running is a no-op.
    pub fn start_maintenance(&self) {
        let mut slot = self.maintenance.lock();
        if slot.is_none() {
            *slot = Some(MaintenanceTask::spawn(
                self.cache.clone(),
                self.governor.clone(),
                self.maintenance_config.clone(),
            ));
        }
    }

    /// Stop the maintenance task, waiting up to its configured timeout
    pub async fn shutdown(&self) {
        let task = self.maintenance.lock().take();
        if let Some(task) = task {
            task.shutdown(self.maintenance_config.shutdown_timeout).await;
        }
    }
}

/// Releases its allocation when dropped
pub struct AllocationGuard {
    governor: Arc<MemoryManager>,
    id: String,
}

impl AllocationGuard {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for AllocationGuard {
    fn drop(&mut self) {
        self.governor.release_allocation(&self.id);
    }
}
