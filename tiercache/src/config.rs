use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::SmartCacheConfig;
use crate::maintenance::MaintenanceConfig;
use crate::memory::GovernorConfig;

/// Top-level configuration for a cache context
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub memory_tier: MemoryTierConfig,
    pub disk_tier: DiskTierConfig,
    pub placement: PlacementConfig,
    pub governor: GovernorSection,
    pub maintenance: MaintenanceSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryTierConfig {
    /// Memory tier capacity in entries
    pub max_entries: usize,
    /// TTL applied when a put does not specify one; `None` disables it
    pub default_ttl_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskTierConfig {
    /// Disk tier directory; defaults to `$TMPDIR/tiercache`
    pub directory: Option<PathBuf>,
    /// Disk tier byte budget in MB
    pub max_size_mb: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementConfig {
    /// Values at or below this serialized size stay in the memory tier
    pub memory_value_threshold: usize,
    /// Cooldown before a pressure-halved memory capacity is restored
    pub capacity_restore_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorSection {
    /// Hard process memory budget in MB
    pub memory_limit_mb: u64,
    /// Default expiry for tracked temporary files
    pub temp_file_max_age_secs: u64,
    /// Directory swept for untracked orphan files
    pub temp_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceSection {
    pub pressure_check_interval_secs: u64,
    pub cleanup_interval_secs: u64,
    pub shutdown_timeout_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_tier: MemoryTierConfig::default(),
            disk_tier: DiskTierConfig::default(),
            placement: PlacementConfig::default(),
            governor: GovernorSection::default(),
            maintenance: MaintenanceSection::default(),
        }
    }
}

impl Default for MemoryTierConfig {
    fn default() -> Self {
        Self {
            max_entries: 500,
            default_ttl_secs: Some(3600),
        }
    }
}

impl Default for DiskTierConfig {
    fn default() -> Self {
        Self {
            directory: None,
            max_size_mb: 50,
        }
    }
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            memory_value_threshold: 10 * 1024,
            capacity_restore_secs: 300,
        }
    }
}

impl Default for GovernorSection {
    fn default() -> Self {
        Self {
            memory_limit_mb: 200,
            temp_file_max_age_secs: 3600,
            temp_dir: None,
        }
    }
}

impl Default for MaintenanceSection {
    fn default() -> Self {
        Self {
            pressure_check_interval_secs: 30,
            cleanup_interval_secs: 300,
            shutdown_timeout_secs: 5,
        }
    }
}

impl CacheConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: CacheConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Convert to the orchestrator's configuration
    pub fn to_smart_cache_config(&self) -> SmartCacheConfig {
        SmartCacheConfig {
            memory_max_entries: self.memory_tier.max_entries,
            disk_max_size_bytes: self.disk_tier.max_size_mb * 1024 * 1024,
            disk_directory: self
                .disk_tier
                .directory
                .clone()
                .unwrap_or_else(|| std::env::temp_dir().join("tiercache")),
            default_ttl: self.memory_tier.default_ttl_secs.map(Duration::from_secs),
            memory_value_threshold: self.placement.memory_value_threshold,
            capacity_restore_cooldown: Duration::from_secs(self.placement.capacity_restore_secs),
        }
    }

    /// Convert to the governor's configuration
    pub fn to_governor_config(&self) -> GovernorConfig {
        GovernorConfig {
            memory_limit_mb: self.governor.memory_limit_mb,
            temp_file_max_age: Duration::from_secs(self.governor.temp_file_max_age_secs),
            temp_dir: self.governor.temp_dir.clone(),
        }
    }

    /// Convert to the maintenance task's configuration
    pub fn to_maintenance_config(&self) -> MaintenanceConfig {
        MaintenanceConfig {
            pressure_check_interval: Duration::from_secs(
                self.maintenance.pressure_check_interval_secs,
            ),
            cleanup_interval: Duration::from_secs(self.maintenance.cleanup_interval_secs),
            shutdown_timeout: Duration::from_secs(self.maintenance.shutdown_timeout_secs),
        }
    }
}
