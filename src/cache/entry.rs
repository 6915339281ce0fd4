use std::{fmt, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// 100 years; longer TTLs are clamped.
const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum TierKind {
    Memory,
    Embedded,
    Network,
}

impl TierKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TierKind::Memory => "memory",
            TierKind::Embedded => "embedded",
            TierKind::Network => "network",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "memory" => Some(TierKind::Memory),
            "embedded" => Some(TierKind::Embedded),
            "network" => Some(TierKind::Network),
            _ => None,
        }
    }
}

impl fmt::Display for TierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Content fingerprint of a task input, namespaced by profile.
///
/// Rendered as `"{profile}:{sha256 hex}"` so that every key of one profile
/// shares the prefix `"{profile}:"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn for_input(profile: &str, input: &[u8]) -> Self {
        let digest = Sha256::digest(input);
        let mut key = String::with_capacity(profile.len() + 1 + digest.len() * 2);
        key.push_str(profile);
        key.push(':');
        for byte in digest.iter() {
            key.push_str(&format!("{byte:02x}"));
        }
        Self(key)
    }

    pub fn profile_prefix(profile: &str) -> String {
        format!("{profile}:")
    }

    /// Key for an intermediate stage of the same input, e.g. `initial`.
    pub fn stage(&self, stage: &str) -> CacheKey {
        CacheKey(format!("{}#{stage}", self.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<CacheKey> for String {
    fn from(key: CacheKey) -> Self {
        key.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: String,
    pub value: Vec<u8>,
    pub tier_origin: TierKind,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub size_bytes: u64,
}

impl CacheEntry {
    pub fn new(
        key: impl Into<String>,
        value: Vec<u8>,
        ttl: Duration,
        tier_origin: TierKind,
        now: DateTime<Utc>,
    ) -> Self {
        let key = key.into();
        let ttl = chrono::Duration::from_std(ttl.min(MAX_TTL))
            .unwrap_or_else(|_| chrono::Duration::seconds(MAX_TTL.as_secs() as i64));
        let expires_at = now.checked_add_signed(ttl).unwrap_or(now);
        let size_bytes = entry_size(&key, &value);

        Self {
            key,
            value,
            tier_origin,
            created_at: now,
            expires_at,
            last_accessed_at: now,
            size_bytes,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Copy of this entry for a faster tier, keeping creation and expiry.
    pub fn promoted(&self, now: DateTime<Utc>) -> Self {
        Self {
            last_accessed_at: now,
            ..self.clone()
        }
    }
}

pub fn entry_size(key: &str, value: &[u8]) -> u64 {
    (key.len() + value.len()) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_deterministic_and_namespaced() {
        let a = CacheKey::for_input("summarize", b"hello");
        let b = CacheKey::for_input("summarize", b"hello");
        let c = CacheKey::for_input("summarize", b"hello!");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.as_str().starts_with(&CacheKey::profile_prefix("summarize")));
        assert_eq!(a.as_str().len(), "summarize:".len() + 64);
        assert_eq!(
            a.as_str(),
            "summarize:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn stage_key_extends_base_key() {
        let key = CacheKey::for_input("p", b"x");
        let stage = key.stage("initial");
        assert!(stage.as_str().starts_with(key.as_str()));
        assert!(stage.as_str().ends_with("#initial"));
    }

    #[test]
    fn expiry_follows_ttl() {
        let now = Utc::now();
        let entry = CacheEntry::new("k", b"v".to_vec(), Duration::from_secs(10), TierKind::Memory, now);

        assert_eq!(entry.size_bytes, 2);
        assert!(!entry.is_expired(now));
        assert!(entry.is_expired(now + chrono::Duration::seconds(10)));
    }
}
