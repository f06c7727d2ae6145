//! Disk-tier cache
//!
//! Size-bounded persistent tier: one backing file per key (named by a
//! content hash of the key) plus a single JSON index that is the
//! authoritative source for all entry metadata. File operations are
//! best-effort; a failing entry is logged and skipped, never aborting a
//! batch. Locks cover index mutation only, never file I/O.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

use crate::core::error::Result;
use crate::core::Metadata;

const INDEX_FILE: &str = "index.json";

/// Persisted per-entry metadata, mirrored in memory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskIndexEntry {
    pub created_at: u64,
    pub last_accessed: u64,
    pub access_count: u64,
    pub ttl_secs: Option<u64>,
    pub size_bytes: u64,
    pub metadata: Metadata,
    pub file_path: PathBuf,
}

impl DiskIndexEntry {
    fn is_expired(&self, now: u64) -> bool {
        self.ttl_secs
            .is_some_and(|ttl| now.saturating_sub(self.created_at) > ttl)
    }

    /// TTL left relative to now; `None` means no expiry
    pub fn remaining_ttl(&self, now: u64) -> Option<Duration> {
        self.ttl_secs.map(|ttl| {
            Duration::from_secs(ttl.saturating_sub(now.saturating_sub(self.created_at)))
        })
    }
}

/// Disk tier statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct DiskStats {
    pub entries: usize,
    pub total_bytes: u64,
    pub max_size_bytes: u64,
    pub usage_percent: f64,
}

/// Size-bounded persistent cache backed by local files plus an index
pub struct DiskCache {
    directory: PathBuf,
    max_size_bytes: u64,
    index: Mutex<HashMap<String, DiskIndexEntry>>,
}

impl DiskCache {
    /// Create or open a disk cache rooted at `directory`.
    ///
    /// A corrupt or unreadable index degrades to an empty cache with a
    /// warning; orphaned backing files are reclaimed by `sweep_orphans`.
    pub fn new(directory: impl Into<PathBuf>, max_size_bytes: u64) -> Result<Self> {
        let directory = directory.into();
        fs::create_dir_all(&directory)?;
        let index = Self::load_index(&directory);
        Ok(Self {
            directory,
            max_size_bytes,
            index: Mutex::new(index),
        })
    }

    fn load_index(directory: &Path) -> HashMap<String, DiskIndexEntry> {
        let index_path = directory.join(INDEX_FILE);
        if !index_path.exists() {
            return HashMap::new();
        }
        match fs::read_to_string(&index_path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(index) => index,
                Err(e) => {
                    warn!("disk cache index unreadable, starting empty: {}", e);
                    HashMap::new()
                }
            },
            Err(e) => {
                warn!("could not load disk cache index: {}", e);
                HashMap::new()
            }
        }
    }

    /// Persist a snapshot of the index. Best-effort: failure is logged.
    fn persist_index(&self) {
        let snapshot = self.index.lock().clone();
        let json = match serde_json::to_string_pretty(&snapshot) {
            Ok(json) => json,
            Err(e) => {
                warn!("could not serialize disk cache index: {}", e);
                return;
            }
        };
        if let Err(e) = fs::write(self.directory.join(INDEX_FILE), json) {
            warn!("could not save disk cache index: {}", e);
        }
    }

    fn file_for(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.directory.join(format!("{}.bin", hex::encode(digest)))
    }

    /// Current unix time in seconds, the clock the index is kept in
    pub fn unix_now() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    fn remove_file(path: &Path) {
        if let Err(e) = fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("could not remove cache file {}: {}", path.display(), e);
            }
        }
    }

    /// Look up a key and return its index entry if it is live.
    ///
    /// Used by the orchestrator to carry remaining TTL across promotion.
    pub fn entry(&self, key: &str) -> Option<DiskIndexEntry> {
        let index = self.index.lock();
        let entry = index.get(key)?;
        if entry.is_expired(Self::unix_now()) {
            return None;
        }
        Some(entry.clone())
    }

    /// Get a value from disk.
    ///
    /// Expiry is decided from the index without touching disk; only a
    /// live hit reads the backing file. A dangling index entry (missing
    /// file) self-heals into a miss.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let now = Self::unix_now();
        let entry = {
            let index = self.index.lock();
            index.get(key).cloned()?
        };

        if entry.is_expired(now) {
            self.index.lock().remove(key);
            Self::remove_file(&entry.file_path);
            self.persist_index();
            debug!("disk tier expired on access: {}", key);
            return None;
        }

        match fs::read(&entry.file_path) {
            Ok(value) => {
                {
                    let mut index = self.index.lock();
                    if let Some(e) = index.get_mut(key) {
                        e.last_accessed = now;
                        e.access_count += 1;
                    }
                }
                self.persist_index();
                Some(value)
            }
            Err(e) => {
                // Backing file is gone or unreadable: drop the index entry
                // and treat the lookup as a miss.
                warn!("dangling disk cache entry {}: {}", key, e);
                self.index.lock().remove(key);
                self.persist_index();
                None
            }
        }
    }

    /// Write a value to disk and index it, evicting least-recently-used
    /// entries until the tier fits its byte budget again.
    pub fn put(&self, key: &str, value: &[u8], ttl: Option<Duration>, metadata: Metadata) -> bool {
        let path = self.file_for(key);
        if let Err(e) = fs::write(&path, value) {
            warn!("could not write disk cache entry {}: {}", key, e);
            return false;
        }

        let now = Self::unix_now();
        let entry = DiskIndexEntry {
            created_at: now,
            last_accessed: now,
            access_count: 0,
            ttl_secs: ttl.map(|t| t.as_secs()),
            size_bytes: value.len() as u64,
            metadata,
            file_path: path,
        };

        let victims = {
            let mut index = self.index.lock();
            if let Some(old) = index.insert(key.to_string(), entry) {
                // Same key hashes to the same backing file; only the
                // index entry needed replacing.
                let _ = old;
            }

            let mut total: u64 = index.values().map(|e| e.size_bytes).sum();
            let mut victims = Vec::new();
            while total > self.max_size_bytes {
                let Some(victim_key) = index
                    .iter()
                    .min_by_key(|(_, e)| e.last_accessed)
                    .map(|(k, _)| k.clone())
                else {
                    break;
                };
                if let Some(victim) = index.remove(&victim_key) {
                    total = total.saturating_sub(victim.size_bytes);
                    victims.push((victim_key, victim.file_path));
                }
            }
            victims
        };

        for (victim_key, victim_path) in &victims {
            debug!("disk tier evicted: {}", victim_key);
            Self::remove_file(victim_path);
        }

        self.persist_index();
        true
    }

    pub fn remove(&self, key: &str) -> bool {
        let entry = self.index.lock().remove(key);
        match entry {
            Some(entry) => {
                Self::remove_file(&entry.file_path);
                self.persist_index();
                true
            }
            None => false,
        }
    }

    pub fn clear(&self) {
        let drained: Vec<DiskIndexEntry> = {
            let mut index = self.index.lock();
            index.drain().map(|(_, e)| e).collect()
        };
        for entry in &drained {
            Self::remove_file(&entry.file_path);
        }
        self.persist_index();
    }

    /// Remove entries whose TTL has elapsed since creation
    pub fn cleanup_expired(&self) -> usize {
        let now = Self::unix_now();
        let expired: Vec<(String, PathBuf)> = {
            let mut index = self.index.lock();
            let keys: Vec<String> = index
                .iter()
                .filter(|(_, e)| e.is_expired(now))
                .map(|(k, _)| k.clone())
                .collect();
            keys.into_iter()
                .filter_map(|k| index.remove(&k).map(|e| (k, e.file_path)))
                .collect()
        };

        for (_, path) in &expired {
            Self::remove_file(path);
        }
        if !expired.is_empty() {
            debug!("disk tier dropped {} expired entries", expired.len());
            self.persist_index();
        }
        expired.len()
    }

    /// Delete backing files that have no index entry. Returns how many
    /// orphans were removed.
    pub fn sweep_orphans(&self) -> usize {
        let indexed: Vec<PathBuf> = {
            let index = self.index.lock();
            index.values().map(|e| e.file_path.clone()).collect()
        };

        let entries = match fs::read_dir(&self.directory) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("could not scan disk cache directory: {}", e);
                return 0;
            }
        };

        let mut removed = 0;
        for dir_entry in entries.flatten() {
            let path = dir_entry.path();
            if path.extension().is_none_or(|ext| ext != "bin") {
                continue;
            }
            if !indexed.contains(&path) {
                Self::remove_file(&path);
                removed += 1;
            }
        }
        if removed > 0 {
            debug!("disk tier removed {} orphan files", removed);
        }
        removed
    }

    pub fn stats(&self) -> DiskStats {
        let index = self.index.lock();
        let total_bytes: u64 = index.values().map(|e| e.size_bytes).sum();
        let usage_percent = if self.max_size_bytes > 0 {
            total_bytes as f64 / self.max_size_bytes as f64 * 100.0
        } else {
            0.0
        };
        DiskStats {
            entries: index.len(),
            total_bytes,
            max_size_bytes: self.max_size_bytes,
            usage_percent,
        }
    }
}
