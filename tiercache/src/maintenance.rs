//! Background maintenance task
//!
//! One supervised periodic task drives cache expiry, pressure checks and
//! governor cleanup. Shutdown is deterministic: a cancellation token plus
//! a bounded join at teardown.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::SmartCache;
use crate::memory::{HealthStatus, MemoryManager, MemoryPriority};

/// Usage percentage above which the cache sheds memory-tier load
const AGGRESSIVE_CLEANUP_PERCENT: f64 = 85.0;

/// Maintenance intervals
#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    /// How often governor pressure is checked
    pub pressure_check_interval: Duration,
    /// How often expired entries and stale files are cleaned
    pub cleanup_interval: Duration,
    /// Bound on the shutdown join
    pub shutdown_timeout: Duration,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            pressure_check_interval: Duration::from_secs(30),
            cleanup_interval: Duration::from_secs(300),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

/// Handle to the running maintenance task
pub struct MaintenanceTask {
    handle: JoinHandle<()>,
    shutdown: CancellationToken,
}

impl MaintenanceTask {
    /// Spawn the maintenance loop
    pub fn spawn(
        cache: Arc<SmartCache>,
        governor: Arc<MemoryManager>,
        config: MaintenanceConfig,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        info!(
            "maintenance task starting (pressure check {:?}, cleanup {:?})",
            config.pressure_check_interval, config.cleanup_interval
        );

        let handle = tokio::spawn(async move {
            let mut pressure_tick = tokio::time::interval(config.pressure_check_interval);
            let mut cleanup_tick = tokio::time::interval(config.cleanup_interval);
            // The first tick of an interval fires immediately; consume both
            // so the loop starts idle.
            pressure_tick.tick().await;
            cleanup_tick.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("maintenance task stopping");
                        break;
                    }
                    _ = pressure_tick.tick() => {
                        Self::check_pressure(&cache, &governor);
                    }
                    _ = cleanup_tick.tick() => {
                        Self::run_cleanup(&cache, &governor);
                    }
                }
            }
        });

        Self { handle, shutdown }
    }

    fn check_pressure(cache: &SmartCache, governor: &MemoryManager) {
        let status = governor.status();
        match status.status {
            HealthStatus::Critical => {
                warn!(
                    "memory critical at {:.1}% usage, forcing cleanup",
                    status.usage_percent
                );
                governor.cleanup_memory(true, None, MemoryPriority::High);
                cache.aggressive_cleanup();
            }
            HealthStatus::Warning => {
                governor.cleanup_memory(false, None, MemoryPriority::Medium);
                if status.usage_percent > AGGRESSIVE_CLEANUP_PERCENT {
                    cache.aggressive_cleanup();
                }
            }
            HealthStatus::Healthy => {}
        }
    }

    fn run_cleanup(cache: &SmartCache, governor: &MemoryManager) {
        let expired = cache.cleanup_expired();
        let orphans = cache.sweep_orphans();
        cache.maybe_restore_capacity();
        let reconciled = governor.reconcile();
        debug!(
            "maintenance pass: {} expired, {} orphans, {} reconciled",
            expired, orphans, reconciled
        );
    }

    /// Request a stop (without waiting)
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    /// Stop the task and wait for it, bounded by the configured timeout
    pub async fn shutdown(self, timeout: Duration) {
        self.shutdown.cancel();
        match tokio::time::timeout(timeout, self.handle).await {
            Ok(Ok(())) => info!("maintenance task stopped"),
            Ok(Err(e)) => warn!("maintenance task ended abnormally: {}", e),
            Err(_) => warn!("maintenance task did not stop within {:?}", timeout),
        }
    }
}
