use serde::{Deserialize, Serialize};

/// One execution tier. The table is ordered cheapest first.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TierSpec {
    pub id: String,
    /// Model variant handed to the runtime.
    pub model: String,
    /// Share of the resource budget this tier needs, in `[0, 1]`.
    pub cost: f64,
    pub max_parallel_workers: usize,
    /// Whether this tier may run on the remote runtime.
    #[serde(default)]
    pub remote_capable: bool,
}

impl TierSpec {
    pub fn new(id: &str, model: &str, cost: f64, max_parallel_workers: usize) -> Self {
        Self {
            id: id.to_string(),
            model: model.to_string(),
            cost,
            max_parallel_workers,
            remote_capable: false,
        }
    }

    pub fn remote_capable(mut self) -> Self {
        self.remote_capable = true;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TierConfig {
    pub tiers: Vec<TierSpec>,
    /// Light tasks need this fraction of a tier's cost.
    pub light_cost_factor: f64,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            tiers: vec![
                TierSpec::new("tiny", "gemma3:1b-q2_K", 0.0, 1),
                TierSpec::new("standard-lite", "gemma3:12b-q2_K", 0.35, 2).remote_capable(),
                TierSpec::new("standard", "gemma3:12b-q4_0", 0.6, 4).remote_capable(),
                TierSpec::new("full", "gemma3:12b-it-q4_K_M", 0.85, 6).remote_capable(),
            ],
            light_cost_factor: 0.5,
        }
    }
}

impl TierConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.tiers.is_empty() {
            return Err("tier table is empty".into());
        }
        for tier in &self.tiers {
            if tier.id.is_empty() || tier.model.is_empty() {
                return Err("tier id and model must be non-empty".into());
            }
            if !(0.0..=1.0).contains(&tier.cost) {
                return Err(format!("tier {} cost {} outside [0, 1]", tier.id, tier.cost));
            }
            if tier.max_parallel_workers == 0 {
                return Err(format!("tier {} has zero workers", tier.id));
            }
        }
        if self.tiers.windows(2).any(|pair| pair[1].cost < pair[0].cost) {
            return Err("tiers must be ordered by non-decreasing cost".into());
        }
        if !(0.0..=1.0).contains(&self.light_cost_factor) {
            return Err("lightCostFactor must be within [0, 1]".into());
        }
        Ok(())
    }
}
