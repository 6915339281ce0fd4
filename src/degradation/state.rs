use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum DegradationMode {
    Normal,
    Throttled,
    Paused,
    Offloaded,
}

impl Default for DegradationMode {
    fn default() -> Self {
        DegradationMode::Normal
    }
}

impl DegradationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DegradationMode::Normal => "normal",
            DegradationMode::Throttled => "throttled",
            DegradationMode::Paused => "paused",
            DegradationMode::Offloaded => "offloaded",
        }
    }

    pub fn is_normal(&self) -> bool {
        matches!(self, DegradationMode::Normal)
    }
}

/// Process-wide degradation state. Written only by the controller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct DegradationState {
    pub current_mode: DegradationMode,
    pub consecutive_breaches: u32,
    pub consecutive_healthy: u32,
    pub last_transition_at: Option<DateTime<Utc>>,
}

impl DegradationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_mode(mode: DegradationMode) -> Self {
        Self {
            current_mode: mode,
            ..Self::default()
        }
    }
}

/// One recorded mode change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Transition {
    pub from: DegradationMode,
    pub to: DegradationMode,
    pub at: DateTime<Utc>,
    pub pressure: f64,
    pub reason: String,
}
