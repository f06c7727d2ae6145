//! End-to-end tests for the memory governor

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::tempdir;
use tiercache::memory::TrackedObject;
use tiercache::{GovernorConfig, HealthStatus, MemoryManager, MemoryPriority};

fn governor_at(current_mb: f64, limit_mb: u64) -> MemoryManager {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("tiercache=debug")
        .with_test_writer()
        .try_init();
    MemoryManager::with_sampler(
        GovernorConfig {
            memory_limit_mb: limit_mb,
            ..Default::default()
        },
        Box::new(move || Some(current_mb)),
    )
}

#[test]
fn test_allocation_within_budget_is_tracked() {
    let governor = governor_at(50.0, 200);

    assert!(governor.track_allocation("dl:1", 20.0, MemoryPriority::Medium, None, None));
    assert!(governor.is_tracked("dl:1"));
    assert_eq!(governor.stats().allocations_tracked, 1);
}

#[test]
fn test_over_budget_allocation_is_refused_after_forced_cleanup() {
    // 95MB in use against a 100MB limit: a 10MB request cannot fit even
    // after the forced cleanup pass, so the governor pushes back.
    let governor = governor_at(95.0, 100);

    let accepted = governor.track_allocation("dl:big", 10.0, MemoryPriority::Medium, None, None);

    assert!(!accepted);
    assert!(!governor.is_tracked("dl:big"));
    assert!(governor.stats().cleanups_performed >= 1);
}

#[test]
fn test_release_runs_hook_once_and_is_idempotent() {
    let governor = governor_at(10.0, 200);
    let runs = Arc::new(AtomicUsize::new(0));
    let hook_runs = runs.clone();

    governor.track_allocation(
        "session:9",
        5.0,
        MemoryPriority::High,
        Some(Box::new(move || {
            hook_runs.fetch_add(1, Ordering::SeqCst);
        })),
        None,
    );

    assert!(governor.release_allocation("session:9"));
    assert!(!governor.release_allocation("session:9"));
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[test]
fn test_reconcile_reclaims_dropped_objects() {
    let governor = governor_at(10.0, 200);
    let runs = Arc::new(AtomicUsize::new(0));
    let hook_runs = runs.clone();

    let object: TrackedObject = Arc::new(vec![0u8; 1024]) as Arc<dyn Any + Send + Sync>;
    governor.track_allocation(
        "buffer:1",
        1.0,
        MemoryPriority::Low,
        Some(Box::new(move || {
            hook_runs.fetch_add(1, Ordering::SeqCst);
        })),
        Some(&object),
    );

    // Owner still alive: nothing to reconcile.
    assert_eq!(governor.reconcile(), 0);
    assert!(governor.is_tracked("buffer:1"));

    drop(object);
    assert_eq!(governor.reconcile(), 1);
    assert!(!governor.is_tracked("buffer:1"));
    assert_eq!(runs.load(Ordering::SeqCst), 1, "hook still runs on reconcile");
    assert_eq!(governor.stats().allocations_reconciled, 1);
}

#[test]
fn test_forced_cleanup_removes_expired_temp_files() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("fragment.bin");
    std::fs::write(&path, vec![0u8; 2048]).unwrap();

    let governor = governor_at(10.0, 200);
    governor.track_temp_file(&path, Some(Duration::ZERO));
    std::thread::sleep(Duration::from_millis(5));

    governor.cleanup_memory(true, None, MemoryPriority::Low);

    assert!(!path.exists());
    assert_eq!(governor.stats().files_cleaned, 1);
}

#[test]
fn test_unforced_cleanup_is_skipped_below_warning_watermark() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("fresh.bin");
    std::fs::write(&path, b"data").unwrap();

    // 10MB of 200MB is well under the 80% watermark.
    let governor = governor_at(10.0, 200);
    governor.track_temp_file(&path, Some(Duration::ZERO));
    std::thread::sleep(Duration::from_millis(5));

    assert_eq!(governor.cleanup_memory(false, None, MemoryPriority::Low), 0.0);
    assert!(path.exists());
    assert_eq!(governor.stats().cleanups_performed, 0);
}

#[test]
fn test_status_watermarks() {
    assert_eq!(governor_at(50.0, 200).status().status, HealthStatus::Healthy);
    assert_eq!(governor_at(170.0, 200).status().status, HealthStatus::Warning);
    assert_eq!(governor_at(196.0, 200).status().status, HealthStatus::Critical);
}

#[test]
fn test_status_reports_tracked_resources() {
    let governor = governor_at(10.0, 200);
    governor.track_allocation("a", 1.0, MemoryPriority::Low, None, None);
    governor.track_temp_file("/tmp/tiercache-test-placeholder", None);

    let status = governor.status();
    assert_eq!(status.tracked_allocations, 1);
    assert_eq!(status.tracked_files, 1);
    assert_eq!(status.limit_mb, 200);
}
