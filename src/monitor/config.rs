use serde::{Deserialize, Serialize};

const GIB: u64 = 1024 * 1024 * 1024;

/// Resource monitor tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MonitorConfig {
    pub poll_interval_ms: u64,
    /// Polls slower than this are logged.
    pub poll_budget_ms: u64,
    /// Trailing ring size.
    pub history_capacity: usize,
    /// How many recent samples the tier selector averages over.
    pub smoothing_window: usize,
    pub thresholds: PressureThresholds,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5_000,
            poll_budget_ms: 200,
            history_capacity: 20,
            smoothing_window: 3,
            thresholds: PressureThresholds::default(),
        }
    }
}

/// Where each resource reaches full pressure (score 1.0).
///
/// CPU and GPU ramp linearly from 0% to their critical utilisation.
/// Temperature ramps from `temperature_nominal_c` to `temperature_critical_c`.
/// Memory ramps from `memory_nominal_bytes` available down to
/// `memory_critical_bytes` available.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PressureThresholds {
    pub cpu_critical_percent: f32,
    pub gpu_critical_percent: f32,
    pub temperature_nominal_c: f32,
    pub temperature_critical_c: f32,
    pub memory_nominal_bytes: u64,
    pub memory_critical_bytes: u64,
}

impl Default for PressureThresholds {
    fn default() -> Self {
        Self {
            cpu_critical_percent: 90.0,
            gpu_critical_percent: 95.0,
            temperature_nominal_c: 40.0,
            temperature_critical_c: 90.0,
            memory_nominal_bytes: 8 * GIB,
            memory_critical_bytes: GIB,
        }
    }
}
