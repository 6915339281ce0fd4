use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::{
    cache::{CacheKey, CacheStatsSnapshot, TierKind},
    degradation::{DegradationMode, Transition},
    dispatch::{DispatchStatsSnapshot, JobReport},
    monitor::SystemSnapshot,
};

/// Per-call options for [`super::Engine::submit`].
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    /// Reject instead of waiting while the engine is paused.
    pub no_wait: bool,
    /// Longest the caller is willing to be held while paused.
    pub max_wait: Option<Duration>,
    pub cancel: Option<CancellationToken>,
}

impl SubmitOptions {
    pub fn no_wait() -> Self {
        Self {
            no_wait: true,
            ..Self::default()
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResultSource {
    Cache(TierKind),
    Computed(JobReport),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubmitOutcome {
    pub value: Vec<u8>,
    pub source: ResultSource,
}

impl SubmitOutcome {
    pub fn from_cache(&self) -> bool {
        matches!(self.source, ResultSource::Cache(_))
    }
}

/// What to drop from the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invalidation {
    Key(String),
    Prefix(String),
}

impl Invalidation {
    /// Every cached result of one task profile.
    pub fn profile(name: &str) -> Self {
        Invalidation::Prefix(CacheKey::profile_prefix(name))
    }
}

impl From<CacheKey> for Invalidation {
    fn from(key: CacheKey) -> Self {
        Invalidation::Key(key.into())
    }
}

/// Plain health data for an external collector to render or re-export.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub mode: DegradationMode,
    pub consecutive_breaches: u32,
    pub last_snapshot: Option<SystemSnapshot>,
    pub pressure: Option<f64>,
    pub cache_stats: CacheStatsSnapshot,
    pub dispatch_stats: DispatchStatsSnapshot,
    pub recent_transitions: Vec<Transition>,
    pub skipped_polls: u64,
}
