use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DegradationConfig {
    /// Pressure strictly above this counts as a breach.
    pub warning_threshold: f64,
    /// Consecutive breaches needed to escalate one level.
    pub breach_window: u32,
    /// Consecutive healthy snapshots needed to return to normal.
    pub recovery_window: u32,
    /// How long admission is held while paused before re-checking.
    pub backoff_ms: u64,
    /// Offload to the remote runtime instead of pausing when it is reachable.
    pub offload_enabled: bool,
    pub transition_log_capacity: usize,
}

impl Default for DegradationConfig {
    fn default() -> Self {
        Self {
            warning_threshold: 0.8,
            breach_window: 3,
            recovery_window: 3,
            backoff_ms: 60_000,
            offload_enabled: true,
            transition_log_capacity: 64,
        }
    }
}
