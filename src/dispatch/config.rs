use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct DispatchConfig {
    pub initial_timeout_ms: u64,
    /// Applies to each refinement worker independently.
    pub worker_timeout_ms: u64,
    pub merge_budget_ms: u64,
    pub remote_probe_timeout_ms: u64,
    pub history_capacity: usize,
    /// Cache the initial prediction under `"{key}#initial"` and reuse it on
    /// the next job for the same input. The stage entry is written even if
    /// that job later fails.
    pub reuse_initial_predictions: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            initial_timeout_ms: 30_000,
            worker_timeout_ms: 20_000,
            merge_budget_ms: 1_000,
            remote_probe_timeout_ms: 500,
            history_capacity: 1_000,
            reuse_initial_predictions: false,
        }
    }
}

impl DispatchConfig {
    pub fn initial_timeout(&self) -> Duration {
        Duration::from_millis(self.initial_timeout_ms)
    }

    pub fn worker_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_timeout_ms)
    }

    pub fn remote_probe_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_probe_timeout_ms)
    }

    /// Whole-job bound: prediction, then the longest single worker (they run
    /// concurrently), then the merge. A remote prediction may be retried
    /// locally once, which doubles the prediction allowance.
    pub fn job_deadline(&self, remote_fallback: bool) -> Duration {
        let attempts = if remote_fallback { 2 } else { 1 };
        Duration::from_millis(
            self.initial_timeout_ms
                .saturating_mul(attempts)
                .saturating_add(self.worker_timeout_ms)
                .saturating_add(self.merge_budget_ms),
        )
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.initial_timeout_ms == 0 || self.worker_timeout_ms == 0 {
            return Err("dispatch timeouts must be positive".into());
        }
        if self.history_capacity == 0 {
            return Err("dispatch.historyCapacity must be positive".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_is_not_a_sum_of_workers() {
        let config = DispatchConfig::default();
        assert_eq!(config.job_deadline(false), Duration::from_millis(51_000));
        assert_eq!(config.job_deadline(true), Duration::from_millis(81_000));
    }

    #[test]
    fn deadline_saturates_instead_of_overflowing() {
        let config = DispatchConfig {
            initial_timeout_ms: u64::MAX / 2 + 1,
            ..DispatchConfig::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.job_deadline(true), Duration::from_millis(u64::MAX));
        assert_eq!(config.job_deadline(false), Duration::from_millis(u64::MAX / 2 + 21_001));
    }
}
