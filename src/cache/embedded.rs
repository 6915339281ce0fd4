use chrono::{DateTime, Utc};

use crate::{
    db::{repositories::EvictionBounds, Database},
    error::CacheTierError,
};

use super::{
    config::TierCapacity,
    entry::{CacheEntry, TierKind},
};

type TierResult<T> = Result<T, CacheTierError>;

fn tier_error(err: anyhow::Error) -> CacheTierError {
    CacheTierError::new(TierKind::Embedded, format!("{err:#}"))
}

/// Persistent tier on the embedded SQLite store.
pub struct EmbeddedTier {
    db: Database,
    capacity: TierCapacity,
    hysteresis: f64,
}

impl EmbeddedTier {
    pub fn new(db: Database, capacity: TierCapacity, hysteresis: f64) -> Self {
        Self {
            db,
            capacity,
            hysteresis,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub async fn get(&self, key: &str, now: DateTime<Utc>) -> TierResult<Option<CacheEntry>> {
        self.db
            .get_cache_entry(key.to_string(), now)
            .await
            .map_err(tier_error)
    }

    pub async fn put(&self, entry: CacheEntry) -> TierResult<()> {
        self.db.put_cache_entry(entry).await.map_err(tier_error)
    }

    pub async fn remove(&self, key: &str) -> TierResult<usize> {
        self.db
            .delete_cache_entry(key.to_string())
            .await
            .map_err(tier_error)
    }

    pub async fn remove_prefix(&self, prefix: &str) -> TierResult<usize> {
        self.db
            .delete_cache_entries_with_prefix(prefix.to_string())
            .await
            .map_err(tier_error)
    }

    pub async fn evict_if_needed(&self) -> TierResult<usize> {
        let (target_bytes, target_entries) = self.capacity.targets(self.hysteresis);
        self.db
            .evict_lru_cache_entries(EvictionBounds {
                max_bytes: self.capacity.max_bytes,
                target_bytes,
                max_entries: self.capacity.max_entries,
                target_entries,
            })
            .await
            .map_err(tier_error)
    }

    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> TierResult<usize> {
        self.db
            .delete_expired_cache_entries(now)
            .await
            .map_err(tier_error)
    }

    /// `(entries, bytes)`
    pub async fn usage(&self) -> TierResult<(u64, u64)> {
        let usage = self.db.cache_usage().await.map_err(tier_error)?;
        Ok((usage.entries, usage.bytes))
    }
}
