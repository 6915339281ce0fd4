use std::{
    collections::{BTreeMap, HashMap},
    sync::{Mutex, MutexGuard},
};

use chrono::{DateTime, Utc};

use super::{config::TierCapacity, entry::CacheEntry};

struct Slot {
    entry: CacheEntry,
    tick: u64,
}

#[derive(Default)]
struct MemoryState {
    entries: HashMap<String, Slot>,
    // access tick -> key, oldest first
    recency: BTreeMap<u64, String>,
    next_tick: u64,
    total_bytes: u64,
}

impl MemoryState {
    fn bump(&mut self) -> u64 {
        self.next_tick += 1;
        self.next_tick
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let slot = self.entries.remove(key)?;
        self.recency.remove(&slot.tick);
        self.total_bytes = self.total_bytes.saturating_sub(slot.entry.size_bytes);
        Some(slot.entry)
    }

    fn usage(&self) -> (u64, u64) {
        (self.entries.len() as u64, self.total_bytes)
    }
}

/// Fastest tier: a process-local LRU map.
///
/// One mutex guards the map and its recency index; no I/O happens under it.
pub struct MemoryTier {
    state: Mutex<MemoryState>,
    capacity: TierCapacity,
    hysteresis: f64,
}

impl MemoryTier {
    pub fn new(capacity: TierCapacity, hysteresis: f64) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            capacity,
            hysteresis,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Live entry for `key`, marked most recently used. Expired entries are
    /// dropped on sight.
    pub fn get(&self, key: &str, now: DateTime<Utc>) -> Option<CacheEntry> {
        let mut state = self.lock();

        let expired = state.entries.get(key)?.entry.is_expired(now);
        if expired {
            state.remove(key);
            return None;
        }

        let tick = state.bump();
        let slot = state.entries.get_mut(key)?;
        let previous = std::mem::replace(&mut slot.tick, tick);
        slot.entry.last_accessed_at = now;
        let entry = slot.entry.clone();

        state.recency.remove(&previous);
        state.recency.insert(tick, key.to_string());
        Some(entry)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().entries.contains_key(key)
    }

    /// Insert or replace; the entry becomes most recently used.
    pub fn insert(&self, entry: CacheEntry) {
        let mut state = self.lock();
        state.remove(&entry.key);

        let tick = state.bump();
        state.total_bytes += entry.size_bytes;
        state.recency.insert(tick, entry.key.clone());
        state.entries.insert(entry.key.clone(), Slot { entry, tick });
    }

    pub fn remove(&self, key: &str) -> bool {
        self.lock().remove(key).is_some()
    }

    pub fn remove_prefix(&self, prefix: &str) -> usize {
        let mut state = self.lock();
        let keys: Vec<String> = state
            .entries
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        for key in &keys {
            state.remove(key);
        }
        keys.len()
    }

    /// Evict least recently used entries once over capacity. Returns the
    /// number evicted.
    pub fn evict_if_needed(&self) -> usize {
        let mut state = self.lock();
        let (entries, bytes) = state.usage();
        if !self.capacity.is_exceeded(entries, bytes) {
            return 0;
        }

        let (target_bytes, target_entries) = self.capacity.targets(self.hysteresis);
        let mut evicted = 0;
        loop {
            let (entries, bytes) = state.usage();
            let entries_ok = target_entries.map_or(true, |target| entries <= target);
            if bytes <= target_bytes && entries_ok {
                break;
            }
            let Some((_, key)) = state.recency.pop_first() else {
                break;
            };
            if let Some(slot) = state.entries.remove(&key) {
                state.total_bytes = state.total_bytes.saturating_sub(slot.entry.size_bytes);
                evicted += 1;
            }
        }
        evicted
    }

    pub fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let mut state = self.lock();
        let expired: Vec<String> = state
            .entries
            .values()
            .filter(|slot| slot.entry.is_expired(now))
            .map(|slot| slot.entry.key.clone())
            .collect();
        for key in &expired {
            state.remove(key);
        }
        expired.len()
    }

    /// `(entries, bytes)`
    pub fn usage(&self) -> (u64, u64) {
        self.lock().usage()
    }
}
