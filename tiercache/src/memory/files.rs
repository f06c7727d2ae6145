//! Temporary file tracking and cleanup
//!
//! Large downloads land in temp files that must not outlive their use on
//! a constrained host. Files registered here are deleted once their age
//! exceeds a per-file maximum; directory sweeps reclaim untracked
//! leftovers. All deletions are best-effort and logged.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, warn};

struct TrackedFile {
    registered_at: Instant,
    max_age: Duration,
}

/// Registry of temporary files eligible for age-based cleanup
pub struct TempFileTracker {
    default_max_age: Duration,
    tracked: Mutex<HashMap<PathBuf, TrackedFile>>,
}

impl TempFileTracker {
    pub fn new(default_max_age: Duration) -> Self {
        Self {
            default_max_age,
            tracked: Mutex::new(HashMap::new()),
        }
    }

    pub fn default_max_age(&self) -> Duration {
        self.default_max_age
    }

    /// Register a file for automatic cleanup once it is older than
    /// `max_age` (the tracker default when unspecified).
    pub fn track(&self, path: impl Into<PathBuf>, max_age: Option<Duration>) {
        let path = path.into();
        self.tracked.lock().insert(
            path,
            TrackedFile {
                registered_at: Instant::now(),
                max_age: max_age.unwrap_or(self.default_max_age),
            },
        );
    }

    /// Stop tracking a file without deleting it
    pub fn untrack(&self, path: &Path) -> bool {
        self.tracked.lock().remove(path).is_some()
    }

    pub fn tracked_count(&self) -> usize {
        self.tracked.lock().len()
    }

    /// Delete tracked files past their individual expiry.
    ///
    /// Returns (files removed, bytes reclaimed). A file that has already
    /// disappeared is simply dropped from tracking.
    pub fn cleanup_tracked(&self) -> (usize, u64) {
        let expired: Vec<PathBuf> = {
            let tracked = self.tracked.lock();
            tracked
                .iter()
                .filter(|(_, f)| f.registered_at.elapsed() > f.max_age)
                .map(|(path, _)| path.clone())
                .collect()
        };

        let mut removed = 0;
        let mut bytes = 0u64;
        for path in expired {
            self.tracked.lock().remove(&path);
            match fs::metadata(&path) {
                Ok(meta) => {
                    if let Err(e) = fs::remove_file(&path) {
                        warn!("could not remove temp file {}: {}", path.display(), e);
                        continue;
                    }
                    removed += 1;
                    bytes += meta.len();
                    debug!("removed expired temp file {}", path.display());
                }
                Err(_) => {
                    // Already gone; tracking entry was stale.
                }
            }
        }
        (removed, bytes)
    }

    /// Delete untracked files in `directory` older than `max_age`.
    ///
    /// Tracked files are left to their own expiry. Returns (files
    /// removed, bytes reclaimed).
    pub fn sweep_directory(&self, directory: &Path, max_age: Duration) -> (usize, u64) {
        let entries = match fs::read_dir(directory) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("could not sweep directory {}: {}", directory.display(), e);
                return (0, 0);
            }
        };

        let tracked: Vec<PathBuf> = self.tracked.lock().keys().cloned().collect();
        let now = SystemTime::now();
        let mut removed = 0;
        let mut bytes = 0u64;

        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() || tracked.contains(&path) {
                continue;
            }
            let Ok(meta) = entry.metadata() else { continue };
            let age = meta
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok());
            if age.is_some_and(|age| age > max_age) {
                if let Err(e) = fs::remove_file(&path) {
                    warn!("could not remove orphan file {}: {}", path.display(), e);
                    continue;
                }
                removed += 1;
                bytes += meta.len();
            }
        }

        if removed > 0 {
            debug!(
                "swept {} orphan files ({} bytes) from {}",
                removed,
                bytes,
                directory.display()
            );
        }
        (removed, bytes)
    }
}
