use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::{
    cache::{CacheEntry, TierKind},
    db::{
        connection::Database,
        helpers::{conversion_error, format_datetime, parse_datetime, to_i64, to_u64},
    },
};

/// Row count and total payload size of the `cache_entries` table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheUsage {
    pub entries: u64,
    pub bytes: u64,
}

/// Eviction bounds for [`Database::evict_lru_cache_entries`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionBounds {
    pub max_bytes: u64,
    pub target_bytes: u64,
    pub max_entries: Option<u64>,
    pub target_entries: Option<u64>,
}

fn row_to_cache_entry(row: &Row) -> Result<CacheEntry, rusqlite::Error> {
    let tier_origin: String = row.get("tier_origin")?;
    let created_at: String = row.get("created_at")?;
    let expires_at: String = row.get("expires_at")?;
    let last_accessed_at: String = row.get("last_accessed_at")?;
    let size_bytes: i64 = row.get("size_bytes")?;

    Ok(CacheEntry {
        key: row.get("key")?,
        value: row.get("value")?,
        tier_origin: TierKind::from_str(&tier_origin).unwrap_or(TierKind::Embedded),
        created_at: parse_datetime(&created_at, "created_at").map_err(conversion_error)?,
        expires_at: parse_datetime(&expires_at, "expires_at").map_err(conversion_error)?,
        last_accessed_at: parse_datetime(&last_accessed_at, "last_accessed_at")
            .map_err(conversion_error)?,
        size_bytes: to_u64(size_bytes, "size_bytes").map_err(conversion_error)?,
    })
}

const NEXT_ACCESS_SEQ: &str = "(SELECT COALESCE(MAX(access_seq), 0) + 1 FROM cache_entries)";

impl Database {
    /// Fetch a live entry and mark it most recently used.
    ///
    /// An expired row is deleted and reported as a miss.
    pub async fn get_cache_entry(
        &self,
        key: String,
        now: DateTime<Utc>,
    ) -> Result<Option<CacheEntry>> {
        self.execute(move |conn| {
            let tx = conn.transaction()?;

            let entry = tx
                .query_row(
                    "SELECT key, value, tier_origin, created_at, expires_at, last_accessed_at, size_bytes
                     FROM cache_entries
                     WHERE key = ?1",
                    params![key],
                    row_to_cache_entry,
                )
                .optional()
                .with_context(|| format!("failed to read cache entry {key}"))?;

            let result = match entry {
                Some(entry) if entry.is_expired(now) => {
                    tx.execute("DELETE FROM cache_entries WHERE key = ?1", params![key])?;
                    None
                }
                Some(mut entry) => {
                    tx.execute(
                        &format!(
                            "UPDATE cache_entries
                             SET last_accessed_at = ?1,
                                 access_seq = {NEXT_ACCESS_SEQ}
                             WHERE key = ?2"
                        ),
                        params![format_datetime(&now), key],
                    )
                    .with_context(|| format!("failed to touch cache entry {key}"))?;
                    entry.last_accessed_at = now;
                    Some(entry)
                }
                None => None,
            };

            tx.commit()?;
            Ok(result)
        })
        .await
    }

    /// Insert or replace an entry; it becomes the most recently used.
    pub async fn put_cache_entry(&self, entry: CacheEntry) -> Result<()> {
        self.execute(move |conn| {
            conn.execute(
                &format!(
                    "INSERT OR REPLACE INTO cache_entries
                     (key, value, tier_origin, created_at, expires_at, last_accessed_at, size_bytes, access_seq)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, {NEXT_ACCESS_SEQ})"
                ),
                params![
                    entry.key,
                    entry.value,
                    entry.tier_origin.as_str(),
                    format_datetime(&entry.created_at),
                    format_datetime(&entry.expires_at),
                    format_datetime(&entry.last_accessed_at),
                    to_i64(entry.size_bytes)?,
                ],
            )
            .with_context(|| format!("failed to write cache entry {}", entry.key))?;
            Ok(())
        })
        .await
    }

    pub async fn delete_cache_entry(&self, key: String) -> Result<usize> {
        self.execute(move |conn| {
            let removed = conn
                .execute("DELETE FROM cache_entries WHERE key = ?1", params![key])
                .with_context(|| format!("failed to delete cache entry {key}"))?;
            Ok(removed)
        })
        .await
    }

    pub async fn delete_cache_entries_with_prefix(&self, prefix: String) -> Result<usize> {
        self.execute(move |conn| {
            // substr instead of LIKE so '%' and '_' in keys stay literal.
            let removed = conn
                .execute(
                    "DELETE FROM cache_entries WHERE substr(key, 1, length(?1)) = ?1",
                    params![prefix],
                )
                .with_context(|| format!("failed to delete cache entries with prefix {prefix}"))?;
            Ok(removed)
        })
        .await
    }

    pub async fn delete_expired_cache_entries(&self, now: DateTime<Utc>) -> Result<usize> {
        self.execute(move |conn| {
            let removed = conn
                .execute(
                    "DELETE FROM cache_entries WHERE expires_at <= ?1",
                    params![format_datetime(&now)],
                )
                .context("failed to sweep expired cache entries")?;
            Ok(removed)
        })
        .await
    }

    pub async fn cache_usage(&self) -> Result<CacheUsage> {
        self.execute(|conn| {
            let (entries, bytes): (i64, i64) = conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(size_bytes), 0) FROM cache_entries",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            Ok(CacheUsage {
                entries: to_u64(entries, "entries")?,
                bytes: to_u64(bytes, "bytes")?,
            })
        })
        .await
    }

    /// Delete least recently used rows once either bound is exceeded, until
    /// both targets are met. Returns the number of rows removed.
    pub async fn evict_lru_cache_entries(&self, bounds: EvictionBounds) -> Result<usize> {
        self.execute(move |conn| {
            let tx = conn.transaction()?;

            let (entries, bytes): (i64, i64) = tx.query_row(
                "SELECT COUNT(*), COALESCE(SUM(size_bytes), 0) FROM cache_entries",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            let mut entries = to_u64(entries, "entries")?;
            let mut bytes = to_u64(bytes, "bytes")?;

            let over_entries = bounds.max_entries.map_or(false, |max| entries > max);
            if bytes <= bounds.max_bytes && !over_entries {
                return Ok(0);
            }

            let victims = {
                let mut stmt =
                    tx.prepare("SELECT key, size_bytes FROM cache_entries ORDER BY access_seq ASC")?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
                    .collect::<Result<Vec<_>, _>>()?;

                let mut victims = Vec::new();
                for (key, size) in rows {
                    let entries_ok = bounds.target_entries.map_or(true, |target| entries <= target);
                    if bytes <= bounds.target_bytes && entries_ok {
                        break;
                    }
                    bytes = bytes.saturating_sub(to_u64(size, "size_bytes")?);
                    entries = entries.saturating_sub(1);
                    victims.push(key);
                }
                victims
            };

            for key in &victims {
                tx.execute("DELETE FROM cache_entries WHERE key = ?1", params![key])?;
            }
            tx.commit().context("failed to commit cache eviction")?;

            Ok(victims.len())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn entry(key: &str, value: &[u8], ttl_secs: u64, now: DateTime<Utc>) -> CacheEntry {
        CacheEntry::new(
            key,
            value.to_vec(),
            Duration::from_secs(ttl_secs),
            TierKind::Embedded,
            now,
        )
    }

    #[tokio::test]
    async fn put_then_get_round_trips_entry() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        db.put_cache_entry(entry("p:a", b"alpha", 60, now)).await.unwrap();

        let later = now + chrono::Duration::seconds(5);
        let found = db.get_cache_entry("p:a".into(), later).await.unwrap().unwrap();
        assert_eq!(found.value, b"alpha".to_vec());
        assert_eq!(found.last_accessed_at, later);
        assert_eq!(found.size_bytes, 8);
    }

    #[tokio::test]
    async fn expired_entry_is_deleted_on_read() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        db.put_cache_entry(entry("p:a", b"alpha", 1, now)).await.unwrap();

        let later = now + chrono::Duration::seconds(2);
        assert!(db.get_cache_entry("p:a".into(), later).await.unwrap().is_none());
        assert_eq!(db.cache_usage().await.unwrap().entries, 0);
    }

    #[tokio::test]
    async fn prefix_delete_treats_wildcards_literally() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        for key in ["a%:1", "a%:2", "ab:1"] {
            db.put_cache_entry(entry(key, b"v", 60, now)).await.unwrap();
        }

        let removed = db.delete_cache_entries_with_prefix("a%:".into()).await.unwrap();
        assert_eq!(removed, 2);
        assert!(db.get_cache_entry("ab:1".into(), now).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn eviction_follows_access_order() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        for key in ["A", "B", "C"] {
            db.put_cache_entry(entry(key, b"v", 60, now)).await.unwrap();
        }
        db.get_cache_entry("A".into(), now).await.unwrap();
        db.put_cache_entry(entry("D", b"v", 60, now)).await.unwrap();

        let removed = db
            .evict_lru_cache_entries(EvictionBounds {
                max_bytes: u64::MAX,
                target_bytes: u64::MAX,
                max_entries: Some(3),
                target_entries: Some(3),
            })
            .await
            .unwrap();

        assert_eq!(removed, 1);
        assert!(db.get_cache_entry("B".into(), now).await.unwrap().is_none());
        assert!(db.get_cache_entry("A".into(), now).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn sweep_removes_only_expired_rows() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        db.put_cache_entry(entry("short", b"v", 1, now)).await.unwrap();
        db.put_cache_entry(entry("long", b"v", 600, now)).await.unwrap();

        let removed = db
            .delete_expired_cache_entries(now + chrono::Duration::seconds(10))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(db.cache_usage().await.unwrap().entries, 1);
    }
}
