//! Memory → embedded → network result cache.
//!
//! Reads walk the tiers fastest first and promote a hit into every faster
//! tier. Writes land in memory and the embedded store before returning; the
//! network write is queued. Invalidation runs memory → embedded → network, so
//! a reader racing an invalidation can at worst observe the slower tiers'
//! pre-invalidation value for the duration of that call. Until the network
//! service confirms a delete, reads of the covered keys skip it, so an
//! invalidated value is never promoted back into the local tiers.
//!
//! Tier failures never escape this module: they are logged, counted, and
//! treated as a miss for that tier.

mod config;
mod embedded;
mod entry;
mod memory;
mod network;
mod stats;
mod sweeper;

pub use config::{CacheConfig, TierCapacity};
pub use embedded::EmbeddedTier;
pub use entry::{CacheEntry, CacheKey, TierKind};
pub use memory::MemoryTier;
pub use network::{LoopbackNetworkCache, NetworkCache, NetworkRecord, NetworkTier};
pub use stats::{CacheStats, CacheStatsSnapshot, TierStats};
pub use sweeper::CacheSweeper;

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;

use crate::{db::Database, error::CacheTierError};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// A value found by [`MultiTierCache::lookup`] and the tier that served it.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheHit {
    pub value: Vec<u8>,
    pub tier: TierKind,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EvictionReport {
    pub memory: usize,
    pub embedded: usize,
}

pub struct MultiTierCache {
    memory: MemoryTier,
    embedded: EmbeddedTier,
    network: Option<NetworkTier>,
    default_ttl: Duration,
    stats: Arc<CacheStats>,
}

impl MultiTierCache {
    /// Open the embedded store named by `config` and wire up the tiers.
    ///
    /// Spawns the network writer, so call from within a Tokio runtime when a
    /// network backend is given.
    pub fn open(config: &CacheConfig, network: Option<Arc<dyn NetworkCache>>) -> Result<Self> {
        let db = match &config.database_path {
            Some(path) => Database::new(path.clone())?,
            None => Database::open_in_memory()?,
        };
        Ok(Self::with_database(config, db, network))
    }

    pub fn with_database(
        config: &CacheConfig,
        db: Database,
        network: Option<Arc<dyn NetworkCache>>,
    ) -> Self {
        let stats = Arc::new(CacheStats::default());
        let hysteresis = config.eviction_hysteresis;
        let network = network.map(|backend| {
            NetworkTier::spawn(
                backend,
                Duration::from_millis(config.network_timeout_ms),
                config.network_queue_capacity,
                Arc::clone(&stats),
            )
        });

        Self {
            memory: MemoryTier::new(config.memory.clone(), hysteresis),
            embedded: EmbeddedTier::new(db, config.embedded.clone(), hysteresis),
            network,
            default_ttl: Duration::from_secs(config.default_ttl_secs),
            stats,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn has_network_tier(&self) -> bool {
        self.network.is_some()
    }

    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.lookup(key).await.map(|hit| hit.value)
    }

    pub async fn lookup(&self, key: &str) -> Option<CacheHit> {
        let now = Utc::now();

        if let Some(entry) = self.memory.get(key, now) {
            self.stats.record_hit(TierKind::Memory);
            return Some(CacheHit {
                value: entry.value,
                tier: TierKind::Memory,
            });
        }

        match self.embedded.get(key, now).await {
            Ok(Some(entry)) => {
                self.stats.record_hit(TierKind::Embedded);
                self.promote_to_memory(entry.promoted(now));
                return Some(CacheHit {
                    value: entry.value,
                    tier: TierKind::Embedded,
                });
            }
            Ok(None) => {}
            Err(err) => self.tier_failed(err, key),
        }

        if let Some(network) = &self.network {
            match network.get(key).await {
                Ok(Some(record)) => {
                    self.stats.record_hit(TierKind::Network);
                    let ttl = record
                        .expires_at
                        .and_then(|at| (at - now).to_std().ok())
                        .unwrap_or(self.default_ttl);
                    if ttl.is_zero() {
                        self.stats.record_miss();
                        return None;
                    }
                    if network.is_delete_pending(key) {
                        self.stats.record_miss();
                        return None;
                    }
                    let entry = CacheEntry::new(key, record.value, ttl, TierKind::Network, now);
                    match self.embedded.put(entry.clone()).await {
                        Ok(()) => {
                            self.stats.record_promotion();
                            self.evict_embedded().await;
                        }
                        Err(err) => self.tier_failed(err, key),
                    }
                    let value = entry.value.clone();
                    self.promote_to_memory(entry);
                    return Some(CacheHit {
                        value,
                        tier: TierKind::Network,
                    });
                }
                Ok(None) => {}
                Err(err) => self.tier_failed(err, key),
            }
        }

        self.stats.record_miss();
        None
    }

    fn promote_to_memory(&self, entry: CacheEntry) {
        self.memory.insert(entry);
        self.stats.record_promotion();
        let evicted = self.memory.evict_if_needed();
        if evicted > 0 {
            self.stats.record_evictions(TierKind::Memory, evicted as u64);
        }
    }

    /// Store `value` under `key` in every tier. A zero TTL stores nothing.
    pub async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) {
        if ttl.is_zero() {
            log_debug!("skipping cache write for {key}: zero ttl");
            return;
        }

        let entry = CacheEntry::new(key, value, ttl, TierKind::Memory, Utc::now());
        self.memory.insert(entry.clone());

        let persisted = CacheEntry {
            tier_origin: TierKind::Embedded,
            ..entry
        };
        let network_value = self.network.as_ref().map(|_| persisted.value.clone());
        if let Err(err) = self.embedded.put(persisted).await {
            self.tier_failed(err, key);
        }

        if let (Some(network), Some(value)) = (&self.network, network_value) {
            network.enqueue_put(key, value, ttl);
        }

        self.stats.record_put();
        self.evict_if_needed().await;
    }

    pub async fn invalidate(&self, key: &str) -> usize {
        let mut removed = usize::from(self.memory.remove(key));

        match self.embedded.remove(key).await {
            Ok(count) => removed += count,
            Err(err) => self.tier_failed(err, key),
        }

        if let Some(network) = &self.network {
            if let Err(err) = network.delete(key).await {
                self.tier_failed(err, key);
            }
        }

        self.stats.record_invalidations(removed as u64);
        log_debug!("invalidated {key} ({removed} local entries)");
        removed
    }

    pub async fn invalidate_prefix(&self, prefix: &str) -> usize {
        let mut removed = self.memory.remove_prefix(prefix);

        match self.embedded.remove_prefix(prefix).await {
            Ok(count) => removed += count,
            Err(err) => self.tier_failed(err, prefix),
        }

        if let Some(network) = &self.network {
            if let Err(err) = network.delete_prefix(prefix).await {
                self.tier_failed(err, prefix);
            }
        }

        self.stats.record_invalidations(removed as u64);
        log_info!("invalidated {removed} local entries with prefix {prefix}");
        removed
    }

    pub async fn evict_if_needed(&self) -> EvictionReport {
        let memory = self.memory.evict_if_needed();
        if memory > 0 {
            self.stats.record_evictions(TierKind::Memory, memory as u64);
        }
        let embedded = self.evict_embedded().await;

        EvictionReport { memory, embedded }
    }

    async fn evict_embedded(&self) -> usize {
        match self.embedded.evict_if_needed().await {
            Ok(count) => {
                if count > 0 {
                    self.stats.record_evictions(TierKind::Embedded, count as u64);
                }
                count
            }
            Err(err) => {
                self.tier_failed(err, "<eviction>");
                0
            }
        }
    }

    /// Remove expired entries from the memory and embedded tiers. The network
    /// tier expires its own entries.
    pub async fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let mut removed = self.memory.sweep_expired(now);
        match self.embedded.sweep_expired(now).await {
            Ok(count) => removed += count,
            Err(err) => self.tier_failed(err, "<sweep>"),
        }
        self.stats.record_expirations(removed as u64);
        removed
    }

    pub async fn stats(&self) -> CacheStatsSnapshot {
        let embedded_usage = match self.embedded.usage().await {
            Ok(usage) => Some(usage),
            Err(err) => {
                self.tier_failed(err, "<stats>");
                None
            }
        };
        self.stats.snapshot(self.memory.usage(), embedded_usage)
    }

    /// Wait for queued network writes and deletes to be attempted.
    pub async fn flush_network(&self) {
        if let Some(network) = &self.network {
            network.flush().await;
        }
    }

    #[cfg(test)]
    pub(crate) fn memory_tier(&self) -> &MemoryTier {
        &self.memory
    }

    #[cfg(test)]
    pub(crate) fn embedded_tier(&self) -> &EmbeddedTier {
        &self.embedded
    }

    fn tier_failed(&self, err: CacheTierError, key: &str) {
        self.stats.record_failure(err.tier);
        log_warn!("{err} (key {key}); treating as miss");
    }
}
