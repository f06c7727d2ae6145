//! Memory governance: monitoring, allocation tracking and temp file cleanup

pub mod files;
pub mod governor;
pub mod monitor;

pub use files::TempFileTracker;
pub use governor::{
    CleanupFn, GovernorConfig, GovernorStats, HealthStatus, MemoryManager, MemoryPriority,
    MemoryStatus, TrackedObject,
};
pub use monitor::{MemoryMonitor, MemoryStats, MemoryTrend, Sampler};
