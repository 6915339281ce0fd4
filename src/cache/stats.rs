use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use super::entry::TierKind;

#[derive(Debug, Default)]
struct TierCounters {
    hits: AtomicU64,
    evictions: AtomicU64,
    failures: AtomicU64,
}

/// Lock-free counters shared by the cache and its background tasks.
#[derive(Debug, Default)]
pub struct CacheStats {
    memory: TierCounters,
    embedded: TierCounters,
    network: TierCounters,
    misses: AtomicU64,
    puts: AtomicU64,
    promotions: AtomicU64,
    expirations: AtomicU64,
    invalidations: AtomicU64,
}

impl CacheStats {
    fn tier(&self, tier: TierKind) -> &TierCounters {
        match tier {
            TierKind::Memory => &self.memory,
            TierKind::Embedded => &self.embedded,
            TierKind::Network => &self.network,
        }
    }

    pub fn record_hit(&self, tier: TierKind) {
        self.tier(tier).hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evictions(&self, tier: TierKind, count: u64) {
        self.tier(tier).evictions.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_failure(&self, tier: TierKind) {
        self.tier(tier).failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_put(&self) {
        self.puts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_promotion(&self) {
        self.promotions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_expirations(&self, count: u64) {
        self.expirations.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_invalidations(&self, count: u64) {
        self.invalidations.fetch_add(count, Ordering::Relaxed);
    }

    fn tier_snapshot(&self, tier: TierKind, usage: Option<(u64, u64)>) -> TierStats {
        let counters = self.tier(tier);
        TierStats {
            hits: counters.hits.load(Ordering::Relaxed),
            evictions: counters.evictions.load(Ordering::Relaxed),
            failures: counters.failures.load(Ordering::Relaxed),
            entries: usage.map(|(entries, _)| entries),
            bytes: usage.map(|(_, bytes)| bytes),
        }
    }

    /// Point-in-time copy. Usage is `(entries, bytes)` where the tier could
    /// report it.
    pub fn snapshot(
        &self,
        memory_usage: (u64, u64),
        embedded_usage: Option<(u64, u64)>,
    ) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            memory: self.tier_snapshot(TierKind::Memory, Some(memory_usage)),
            embedded: self.tier_snapshot(TierKind::Embedded, embedded_usage),
            network: self.tier_snapshot(TierKind::Network, None),
            misses: self.misses.load(Ordering::Relaxed),
            puts: self.puts.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TierStats {
    pub hits: u64,
    pub evictions: u64,
    pub failures: u64,
    pub entries: Option<u64>,
    pub bytes: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatsSnapshot {
    pub memory: TierStats,
    pub embedded: TierStats,
    pub network: TierStats,
    pub misses: u64,
    pub puts: u64,
    pub promotions: u64,
    pub expirations: u64,
    pub invalidations: u64,
}

impl CacheStatsSnapshot {
    pub fn hits(&self) -> u64 {
        self.memory.hits + self.embedded.hits + self.network.hits
    }

    pub fn hit_ratio(&self) -> f64 {
        let lookups = self.hits() + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits() as f64 / lookups as f64
        }
    }
}
