//! Allocation governor
//!
//! Tracks explicit large memory reservations against a hard budget and
//! applies backpressure when the budget would be exceeded. The governor
//! never owns caller objects: it keeps weak handles only, and a periodic
//! reconciliation pass reclaims bookkeeping for owners that were dropped
//! without an explicit release. Explicit release is the primary path;
//! reconciliation is a safety net.

use parking_lot::Mutex;
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::files::TempFileTracker;
use super::monitor::{MemoryMonitor, MemoryStats, Sampler};
use crate::core::CacheError;
use crate::core::Metadata;

/// Priority of a tracked allocation, in ascending urgency.
///
/// Lower priorities are released first under pressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl MemoryPriority {
    /// Minimum age before pressure cleanup may release an allocation of
    /// this priority. `None` means cleanup never releases it.
    fn min_cleanup_age(self) -> Option<Duration> {
        match self {
            MemoryPriority::Low => Some(Duration::from_secs(3600)),
            MemoryPriority::Medium => Some(Duration::from_secs(1800)),
            MemoryPriority::High => Some(Duration::from_secs(600)),
            MemoryPriority::Critical => None,
        }
    }
}

/// Cleanup hook invoked at most once when an allocation is released
pub type CleanupFn = Box<dyn FnOnce() + Send>;

/// Weakly-held reference to the object an allocation accounts for
pub type TrackedObject = Arc<dyn Any + Send + Sync>;

struct Allocation {
    size_mb: f64,
    created_at: Instant,
    #[allow(dead_code)]
    last_accessed: Instant,
    priority: MemoryPriority,
    cleanup: Option<CleanupFn>,
    handle: Option<Weak<dyn Any + Send + Sync>>,
    #[allow(dead_code)]
    metadata: Metadata,
    #[cfg(test)]
    age_override: Option<Duration>,
}

impl Allocation {
    fn age(&self) -> Duration {
        #[cfg(test)]
        if let Some(age) = self.age_override {
            return age;
        }
        self.created_at.elapsed()
    }
}

/// Governor health, derived from usage watermarks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
}

/// Point-in-time governor status
#[derive(Debug, Clone, Serialize)]
pub struct MemoryStatus {
    pub status: HealthStatus,
    pub current_mb: f64,
    pub limit_mb: u64,
    pub usage_percent: f64,
    pub tracked_allocations: usize,
    pub tracked_files: usize,
}

/// Cumulative governor counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct GovernorStats {
    pub cleanups_performed: u64,
    pub memory_freed_mb: f64,
    pub files_cleaned: u64,
    pub allocations_tracked: u64,
    pub allocations_reconciled: u64,
}

/// Governor configuration
#[derive(Debug, Clone)]
pub struct GovernorConfig {
    /// Hard memory budget for the process
    pub memory_limit_mb: u64,
    /// Default expiry for tracked temporary files
    pub temp_file_max_age: Duration,
    /// Directory swept for untracked orphan files, if any
    pub temp_dir: Option<PathBuf>,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            memory_limit_mb: 200,
            temp_file_max_age: Duration::from_secs(3600),
            temp_dir: None,
        }
    }
}

/// Tracks explicit allocations against a hard budget and drives
/// prioritized cleanup under pressure.
pub struct MemoryManager {
    config: GovernorConfig,
    warning_mb: f64,
    monitor: MemoryMonitor,
    files: TempFileTracker,
    allocations: Mutex<HashMap<String, Allocation>>,
    stats: Mutex<GovernorStats>,
}

impl MemoryManager {
    pub fn new(config: GovernorConfig) -> Self {
        Self::with_monitor(config, MemoryMonitor::new())
    }

    /// Construct with a custom sampler, used by tests for determinism
    pub fn with_sampler(config: GovernorConfig, sampler: Sampler) -> Self {
        Self::with_monitor(config, MemoryMonitor::with_sampler(sampler))
    }

    fn with_monitor(config: GovernorConfig, monitor: MemoryMonitor) -> Self {
        info!("memory governor initialized, limit {}MB", config.memory_limit_mb);
        let files = TempFileTracker::new(config.temp_file_max_age);
        Self {
            warning_mb: config.memory_limit_mb as f64 * 0.8,
            config,
            monitor,
            files,
            allocations: Mutex::new(HashMap::new()),
            stats: Mutex::new(GovernorStats::default()),
        }
    }

    fn budget_check(&self, current_mb: f64, requested_mb: f64) -> Result<(), CacheError> {
        if current_mb + requested_mb > self.config.memory_limit_mb as f64 {
            Err(CacheError::CapacityExceeded {
                requested_mb,
                current_mb,
                limit_mb: self.config.memory_limit_mb,
            })
        } else {
            Ok(())
        }
    }

    /// Track a large allocation before the caller performs the work that
    /// holds it.
    ///
    /// Returns `false` when the budget cannot accommodate the request
    /// even after a forced cleanup pass; this is the backpressure signal.
    /// Rejection leaves governor bookkeeping untouched.
    pub fn track_allocation(
        &self,
        id: &str,
        size_mb: f64,
        priority: MemoryPriority,
        cleanup: Option<CleanupFn>,
        object: Option<&TrackedObject>,
    ) -> bool {
        let mut current = self.monitor.record_sample();

        if let Err(e) = self.budget_check(current, size_mb) {
            warn!("{}, attempting forced cleanup", e);
            self.cleanup_memory(true, Some(size_mb), MemoryPriority::Medium);
            current = self.monitor.record_sample();
            if let Err(e) = self.budget_check(current, size_mb) {
                warn!("rejecting allocation {}: {}", id, e);
                return false;
            }
        }

        let now = Instant::now();
        let allocation = Allocation {
            size_mb,
            created_at: now,
            last_accessed: now,
            priority,
            cleanup,
            handle: object.map(Arc::downgrade),
            metadata: Metadata::new(),
            #[cfg(test)]
            age_override: None,
        };
        self.allocations.lock().insert(id.to_string(), allocation);
        self.stats.lock().allocations_tracked += 1;
        debug!("tracked allocation {} ({:.1}MB, {:?})", id, size_mb, priority);
        true
    }

    /// Release a tracked allocation, invoking its cleanup hook.
    ///
    /// Idempotent: a second call for an already-released id is a no-op
    /// and the hook runs at most once. The hook runs with no governor
    /// lock held.
    pub fn release_allocation(&self, id: &str) -> bool {
        let released = self.allocations.lock().remove(id);
        match released {
            Some(mut allocation) => {
                if let Some(cleanup) = allocation.cleanup.take() {
                    cleanup();
                }
                debug!("released allocation {} ({:.1}MB)", id, allocation.size_mb);
                true
            }
            None => false,
        }
    }

    /// Register a temporary file for governor-driven cleanup
    pub fn track_temp_file(&self, path: impl Into<PathBuf>, max_age: Option<Duration>) {
        self.files.track(path, max_age);
    }

    /// Run the ordered cleanup passes, returning the memory freed in MB.
    ///
    /// Passes: stale tracked allocations at or below `threshold` (oldest
    /// first per priority tier, gated by per-priority minimum ages),
    /// expired temp files plus untracked orphans, then a reconciliation
    /// sweep. The return value is the measured before/after delta,
    /// falling back to the summed estimates when the measurement is
    /// negative or noisy.
    pub fn cleanup_memory(
        &self,
        force: bool,
        target_mb: Option<f64>,
        threshold: MemoryPriority,
    ) -> f64 {
        let start_mb = self.monitor.record_sample();
        if !force && start_mb < self.warning_mb {
            return 0.0;
        }

        info!("memory cleanup starting at {:.1}MB", start_mb);
        let mut estimated_mb = self.release_stale_allocations(threshold, target_mb);
        estimated_mb += self.cleanup_files();
        let (_, reconciled_mb) = self.reconcile_dead_handles();
        estimated_mb += reconciled_mb;

        let end_mb = self.monitor.record_sample();
        let actual_mb = start_mb - end_mb;
        {
            let mut stats = self.stats.lock();
            stats.cleanups_performed += 1;
            stats.memory_freed_mb += actual_mb.max(0.0);
        }
        info!(
            "memory cleanup done, freed {:.1}MB (estimated {:.1}MB)",
            actual_mb, estimated_mb
        );

        if actual_mb > 0.0 { actual_mb } else { estimated_mb }
    }

    /// Release allocations at or below `threshold`, lowest priority first
    /// and oldest first within a tier, honoring minimum ages. Stops once
    /// `target_mb` has been reached.
    fn release_stale_allocations(
        &self,
        threshold: MemoryPriority,
        target_mb: Option<f64>,
    ) -> f64 {
        let mut freed_mb = 0.0;
        let mut hooks: Vec<CleanupFn> = Vec::new();

        {
            let mut allocations = self.allocations.lock();
            let mut candidates: Vec<(String, MemoryPriority, Instant)> = allocations
                .iter()
                .filter(|(_, a)| a.priority <= threshold)
                .filter(|(_, a)| {
                    a.priority
                        .min_cleanup_age()
                        .is_some_and(|min_age| a.age() >= min_age)
                })
                .map(|(id, a)| (id.clone(), a.priority, a.created_at))
                .collect();
            candidates.sort_by_key(|(_, priority, created_at)| (*priority, *created_at));

            for (id, _, _) in candidates {
                if target_mb.is_some_and(|target| freed_mb >= target) {
                    break;
                }
                if let Some(mut allocation) = allocations.remove(&id) {
                    freed_mb += allocation.size_mb;
                    if let Some(cleanup) = allocation.cleanup.take() {
                        hooks.push(cleanup);
                    }
                    debug!("cleanup released allocation {}", id);
                }
            }
        }

        for hook in hooks {
            hook();
        }
        freed_mb
    }

    /// Delete expired temp files and orphans, returning the estimated MB
    fn cleanup_files(&self) -> f64 {
        let (mut removed, mut bytes) = self.files.cleanup_tracked();
        if let Some(temp_dir) = &self.config.temp_dir {
            // Orphans get twice the default expiry before they are swept.
            let orphan_age = self.config.temp_file_max_age * 2;
            let (orphans, orphan_bytes) = self.files.sweep_directory(temp_dir, orphan_age);
            removed += orphans;
            bytes += orphan_bytes;
        }
        if removed > 0 {
            self.stats.lock().files_cleaned += removed as u64;
            info!("cleaned {} temporary files", removed);
        }
        bytes as f64 / (1024.0 * 1024.0)
    }

    /// Reconciliation safety net: drop bookkeeping for allocations whose
    /// owning object was reclaimed without an explicit release. The
    /// cleanup hook still runs (it may hold external resources such as
    /// temp files).
    pub fn reconcile(&self) -> usize {
        self.reconcile_dead_handles().0
    }

    fn reconcile_dead_handles(&self) -> (usize, f64) {
        let mut hooks: Vec<CleanupFn> = Vec::new();
        let mut freed_mb = 0.0;
        let reclaimed: Vec<String> = {
            let mut allocations = self.allocations.lock();
            let dead: Vec<String> = allocations
                .iter()
                .filter(|(_, a)| {
                    a.handle
                        .as_ref()
                        .is_some_and(|weak| weak.upgrade().is_none())
                })
                .map(|(id, _)| id.clone())
                .collect();
            for id in &dead {
                if let Some(mut allocation) = allocations.remove(id) {
                    freed_mb += allocation.size_mb;
                    if let Some(cleanup) = allocation.cleanup.take() {
                        hooks.push(cleanup);
                    }
                }
            }
            dead
        };

        for hook in hooks {
            hook();
        }
        if !reclaimed.is_empty() {
            self.stats.lock().allocations_reconciled += reclaimed.len() as u64;
            debug!("reconciled {} dropped allocations", reclaimed.len());
        }
        (reclaimed.len(), freed_mb)
    }

    /// Current health status derived from usage watermarks
    pub fn status(&self) -> MemoryStatus {
        let current_mb = self.monitor.record_sample();
        let limit_mb = self.config.memory_limit_mb;
        let usage_percent = if limit_mb > 0 {
            current_mb / limit_mb as f64 * 100.0
        } else {
            0.0
        };
        let status = if usage_percent >= 95.0 {
            HealthStatus::Critical
        } else if usage_percent >= 80.0 {
            HealthStatus::Warning
        } else {
            HealthStatus::Healthy
        };
        MemoryStatus {
            status,
            current_mb,
            limit_mb,
            usage_percent,
            tracked_allocations: self.allocations.lock().len(),
            tracked_files: self.files.tracked_count(),
        }
    }

    pub fn monitor_stats(&self) -> MemoryStats {
        self.monitor.stats()
    }

    pub fn stats(&self) -> GovernorStats {
        self.stats.lock().clone()
    }

    pub fn tracked_count(&self) -> usize {
        self.allocations.lock().len()
    }

    pub fn is_tracked(&self, id: &str) -> bool {
        self.allocations.lock().contains_key(id)
    }

    /// Pretend an allocation is `age` old (test hook for exercising the
    /// cleanup age gates).
    #[cfg(test)]
    pub(crate) fn backdate(&self, id: &str, age: Duration) {
        if let Some(allocation) = self.allocations.lock().get_mut(id) {
            allocation.age_override = Some(age);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fixed_sampler(mb: f64) -> Sampler {
        Box::new(move || Some(mb))
    }

    fn governor_at(current_mb: f64, limit_mb: u64) -> MemoryManager {
        MemoryManager::with_sampler(
            GovernorConfig {
                memory_limit_mb: limit_mb,
                ..Default::default()
            },
            fixed_sampler(current_mb),
        )
    }

    #[test]
    fn test_allocation_within_budget_is_tracked() {
        let governor = governor_at(50.0, 200);
        assert!(governor.track_allocation("dl-1", 20.0, MemoryPriority::Medium, None, None));
        assert!(governor.is_tracked("dl-1"));
        assert_eq!(governor.tracked_count(), 1);
    }

    #[test]
    fn test_over_budget_rejected_with_untouched_bookkeeping() {
        let governor = governor_at(95.0, 100);
        governor.track_allocation("existing", 2.0, MemoryPriority::High, None, None);
        let before = governor.tracked_count();
        let stats_before = governor.stats();

        // Forced cleanup cannot change the fixed sample, so this must fail
        assert!(!governor.track_allocation("x", 10.0, MemoryPriority::High, None, None));

        assert!(!governor.is_tracked("x"));
        assert_eq!(governor.tracked_count(), before);
        let stats_after = governor.stats();
        assert_eq!(stats_after.allocations_tracked, stats_before.allocations_tracked);
        assert!(
            stats_after.cleanups_performed > stats_before.cleanups_performed,
            "a forced cleanup pass was attempted before rejecting"
        );
    }

    #[test]
    fn test_release_is_idempotent_and_runs_hook_once() {
        let governor = governor_at(10.0, 200);
        let calls = Arc::new(AtomicUsize::new(0));
        let hook_calls = calls.clone();

        governor.track_allocation(
            "buf",
            5.0,
            MemoryPriority::High,
            Some(Box::new(move || {
                hook_calls.fetch_add(1, Ordering::SeqCst);
            })),
            None,
        );

        assert!(governor.release_allocation("buf"));
        assert!(!governor.release_allocation("buf"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cleanup_honors_age_gates_and_priority_threshold() {
        let governor = governor_at(10.0, 200);
        governor.track_allocation("old-low", 5.0, MemoryPriority::Low, None, None);
        governor.track_allocation("fresh-low", 5.0, MemoryPriority::Low, None, None);
        governor.track_allocation("old-high", 5.0, MemoryPriority::High, None, None);
        governor.track_allocation("critical", 5.0, MemoryPriority::Critical, None, None);
        governor.backdate("old-low", Duration::from_secs(7200));
        governor.backdate("old-high", Duration::from_secs(7200));
        governor.backdate("critical", Duration::from_secs(86400));

        let freed = governor.cleanup_memory(true, None, MemoryPriority::Medium);

        assert!(!governor.is_tracked("old-low"), "aged low released");
        assert!(governor.is_tracked("fresh-low"), "fresh allocation kept");
        assert!(
            governor.is_tracked("old-high"),
            "high is above the medium threshold"
        );
        assert!(governor.is_tracked("critical"), "critical never released");
        assert!(freed >= 5.0);
    }

    #[test]
    fn test_cleanup_stops_at_target() {
        let governor = governor_at(10.0, 200);
        for i in 0..4 {
            governor.track_allocation(&format!("a{}", i), 10.0, MemoryPriority::Low, None, None);
            governor.backdate(&format!("a{}", i), Duration::from_secs(7200));
        }

        let freed = governor.cleanup_memory(true, Some(15.0), MemoryPriority::Low);
        assert!((15.0..=20.0).contains(&freed));
        assert_eq!(governor.tracked_count(), 2, "stopped once target was met");
    }

    #[test]
    fn test_reconcile_reclaims_dropped_owner() {
        let governor = governor_at(10.0, 200);
        let buffer: TrackedObject = Arc::new(vec![0u8; 1024]);

        governor.track_allocation("held", 1.0, MemoryPriority::High, None, Some(&buffer));
        assert_eq!(governor.reconcile(), 0, "live owner is not reclaimed");

        drop(buffer);
        assert_eq!(governor.reconcile(), 1);
        assert!(!governor.is_tracked("held"));
        assert_eq!(governor.stats().allocations_reconciled, 1);
    }

    #[test]
    fn test_status_watermarks() {
        assert_eq!(governor_at(50.0, 100).status().status, HealthStatus::Healthy);
        assert_eq!(governor_at(85.0, 100).status().status, HealthStatus::Warning);
        assert_eq!(governor_at(96.0, 100).status().status, HealthStatus::Critical);

        let status = governor_at(50.0, 100).status();
        assert_eq!(status.usage_percent, 50.0);
        assert_eq!(status.limit_mb, 100);
    }

}
