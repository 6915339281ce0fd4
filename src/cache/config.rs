use std::path::PathBuf;

use serde::{Deserialize, Serialize};

const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct TierCapacity {
    pub max_bytes: u64,
    /// Optional bound on the number of entries, checked alongside bytes.
    pub max_entries: Option<u64>,
}

impl TierCapacity {
    pub fn bytes(max_bytes: u64) -> Self {
        Self {
            max_bytes,
            max_entries: None,
        }
    }

    pub fn entries(max_entries: u64) -> Self {
        Self {
            max_bytes: u64::MAX,
            max_entries: Some(max_entries),
        }
    }

    pub fn is_exceeded(&self, entries: u64, bytes: u64) -> bool {
        bytes > self.max_bytes || self.max_entries.map_or(false, |max| entries > max)
    }

    /// Level eviction drains down to once triggered.
    pub fn targets(&self, hysteresis: f64) -> (u64, Option<u64>) {
        (
            below_margin(self.max_bytes, hysteresis),
            self.max_entries.map(|max| below_margin(max, hysteresis)),
        )
    }
}

impl Default for TierCapacity {
    fn default() -> Self {
        Self::bytes(256 * MIB)
    }
}

fn below_margin(capacity: u64, hysteresis: f64) -> u64 {
    if capacity == u64::MAX {
        return capacity;
    }
    let margin = (capacity as f64 * hysteresis).floor() as u64;
    capacity.saturating_sub(margin)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheConfig {
    pub default_ttl_secs: u64,
    pub sweep_interval_secs: u64,
    /// Fraction of capacity freed below the limit on each eviction.
    pub eviction_hysteresis: f64,
    pub memory: TierCapacity,
    pub embedded: TierCapacity,
    /// SQLite file for the embedded tier; `None` keeps it in memory.
    pub database_path: Option<PathBuf>,
    pub network_timeout_ms: u64,
    pub network_queue_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 3600,
            sweep_interval_secs: 300,
            eviction_hysteresis: 0.1,
            memory: TierCapacity::bytes(256 * MIB),
            embedded: TierCapacity::bytes(1024 * MIB),
            database_path: None,
            network_timeout_ms: 250,
            network_queue_capacity: 256,
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..1.0).contains(&self.eviction_hysteresis) {
            return Err(format!(
                "cache.evictionHysteresis must be in [0, 1), got {}",
                self.eviction_hysteresis
            ));
        }
        if self.sweep_interval_secs == 0 {
            return Err("cache.sweepIntervalSecs must be positive".into());
        }
        if self.network_queue_capacity == 0 {
            return Err("cache.networkQueueCapacity must be positive".into());
        }
        Ok(())
    }
}
