use serde::Serialize;

use crate::{
    degradation::{DegradationMode, DegradationState},
    models::{CostClass, TaskProfile},
    monitor::{pressure_breakdown, PressureThresholds, SystemSnapshot},
};

use super::config::{TierConfig, TierSpec};

const COST_EPSILON: f64 = 1e-9;

/// Per-request execution choice. Recomputed on every dispatch.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TierDecision {
    pub tier_id: String,
    pub tier_index: usize,
    pub model: String,
    pub max_parallel_workers: usize,
    pub use_remote: bool,
    pub pressure: f64,
    pub rationale: String,
}

impl TierDecision {
    fn from_spec(index: usize, spec: &TierSpec, pressure: f64, rationale: String) -> Self {
        Self {
            tier_id: spec.id.clone(),
            tier_index: index,
            model: spec.model.clone(),
            max_parallel_workers: spec.max_parallel_workers.max(1),
            use_remote: false,
            pressure,
            rationale,
        }
    }
}

/// Pure mapping from (profile, snapshot, degradation) to a tier.
#[derive(Debug, Clone)]
pub struct TierSelector {
    config: TierConfig,
    thresholds: PressureThresholds,
    remote_configured: bool,
}

impl TierSelector {
    pub fn new(config: TierConfig, thresholds: PressureThresholds, remote_configured: bool) -> Self {
        Self {
            config,
            thresholds,
            remote_configured,
        }
    }

    pub fn tiers(&self) -> &[TierSpec] {
        &self.config.tiers
    }

    pub fn select_tier(
        &self,
        profile: &TaskProfile,
        snapshot: &SystemSnapshot,
        degradation: &DegradationState,
    ) -> TierDecision {
        self.select(profile, snapshot, degradation, self.remote_configured)
    }

    /// Same choice with the remote runtime ruled out, e.g. after a failed
    /// reachability probe.
    pub fn select_tier_without_remote(
        &self,
        profile: &TaskProfile,
        snapshot: &SystemSnapshot,
        degradation: &DegradationState,
        reason: &str,
    ) -> TierDecision {
        let mut decision = self.select(profile, snapshot, degradation, false);
        decision.rationale.push_str("; remote excluded: ");
        decision.rationale.push_str(reason);
        decision
    }

    fn select(
        &self,
        profile: &TaskProfile,
        snapshot: &SystemSnapshot,
        degradation: &DegradationState,
        remote_usable: bool,
    ) -> TierDecision {
        let breakdown = pressure_breakdown(snapshot, &self.thresholds);
        let pressure = breakdown.score();
        let mode = degradation.current_mode;

        if self.config.tiers.is_empty() {
            return fallback_decision(pressure);
        }

        // Offloaded work leaves this host, so local pressure does not bound it.
        if mode == DegradationMode::Offloaded && remote_usable {
            let (chosen, uncapped) = self.pick(profile, 0.0, mode);
            let spec = &self.config.tiers[chosen];
            if spec.remote_capable {
                let rationale = format!(
                    "offloading {:?} task: tier {} capped to {} while {}",
                    profile.cost_class,
                    self.config.tiers[uncapped].id,
                    spec.id,
                    mode.as_str()
                );
                let mut decision = TierDecision::from_spec(chosen, spec, pressure, rationale);
                decision.use_remote = true;
                return decision;
            }
        }

        let (chosen, uncapped) = self.pick(profile, pressure, mode);
        let spec = &self.config.tiers[chosen];
        let mut rationale = format!(
            "pressure {:.2} ({}) leaves {:.2} of budget; {:?} task fits tier {}",
            pressure,
            breakdown.dominant(),
            (1.0 - pressure).max(0.0),
            profile.cost_class,
            self.config.tiers[uncapped].id,
        );
        if chosen != uncapped {
            rationale.push_str(&format!("; capped to {} while {}", spec.id, mode.as_str()));
        }

        TierDecision::from_spec(chosen, spec, pressure, rationale)
    }

    /// Returns `(chosen, uncapped)` tier indexes. The table must be non-empty.
    fn pick(&self, profile: &TaskProfile, pressure: f64, mode: DegradationMode) -> (usize, usize) {
        let factor = match profile.cost_class {
            CostClass::Light => self.config.light_cost_factor,
            CostClass::Heavy => 1.0,
        };
        let allowance = 1.0 - pressure;

        // Highest tier that fits; equal requirements keep the cheaper one.
        let mut chosen = 0;
        let mut chosen_requirement = self.config.tiers[0].cost * factor;
        for (index, tier) in self.config.tiers.iter().enumerate().skip(1) {
            let requirement = tier.cost * factor;
            if requirement <= allowance + COST_EPSILON && requirement > chosen_requirement {
                chosen = index;
                chosen_requirement = requirement;
            }
        }

        if mode.is_normal() {
            (chosen, chosen)
        } else {
            (chosen.saturating_sub(1), chosen)
        }
    }
}

fn fallback_decision(pressure: f64) -> TierDecision {
    let spec = TierSpec::new("minimal", "default", 0.0, 1);
    TierDecision::from_spec(0, &spec, pressure, "no tiers configured; using minimal tier".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    const GIB: u64 = 1024 * 1024 * 1024;

    fn selector(remote: bool) -> TierSelector {
        TierSelector::new(TierConfig::default(), PressureThresholds::default(), remote)
    }

    fn at_cpu(cpu: f32) -> SystemSnapshot {
        SystemSnapshot {
            timestamp: Utc::now(),
            cpu_percent: cpu,
            mem_available_bytes: 32 * GIB,
            gpu_percent: None,
            temperature_c: None,
        }
    }

    fn heavy() -> TaskProfile {
        TaskProfile::new("summarize", CostClass::Heavy)
    }

    #[test]
    fn zero_pressure_selects_richest_tier() {
        let decision = selector(false).select_tier(&heavy(), &at_cpu(0.0), &DegradationState::new());
        assert_eq!(decision.tier_id, "full");
        assert_eq!(decision.max_parallel_workers, 6);
        assert!(!decision.use_remote);
    }

    #[test]
    fn full_pressure_selects_minimum_tier() {
        let decision = selector(false).select_tier(&heavy(), &at_cpu(95.0), &DegradationState::new());
        assert_eq!(decision.tier_index, 0);
        assert_eq!(decision.tier_id, "tiny");
        assert_eq!(decision.pressure, 1.0);
    }

    #[test]
    fn mid_pressure_picks_highest_affordable_tier() {
        // cpu 45% of 90% critical => pressure 0.5 => allowance 0.5
        let decision = selector(false).select_tier(&heavy(), &at_cpu(45.0), &DegradationState::new());
        assert_eq!(decision.tier_id, "standard-lite");

        let light = TaskProfile::new("classify", CostClass::Light);
        let decision = selector(false).select_tier(&light, &at_cpu(45.0), &DegradationState::new());
        assert_eq!(decision.tier_id, "full");
    }

    #[test]
    fn degraded_mode_caps_one_level_down() {
        let throttled = DegradationState::in_mode(DegradationMode::Throttled);
        let decision = selector(false).select_tier(&heavy(), &at_cpu(0.0), &throttled);
        assert_eq!(decision.tier_id, "standard");
        assert!(decision.rationale.contains("throttled"));

        let decision = selector(false).select_tier(&heavy(), &at_cpu(95.0), &throttled);
        assert_eq!(decision.tier_index, 0);
    }

    #[test]
    fn ties_go_to_the_cheaper_tier() {
        let config = TierConfig {
            tiers: vec![
                TierSpec::new("a", "m-a", 0.0, 1),
                TierSpec::new("b", "m-b", 0.5, 2),
                TierSpec::new("c", "m-c", 0.5, 3),
            ],
            light_cost_factor: 0.5,
        };
        let selector = TierSelector::new(config, PressureThresholds::default(), false);
        let decision = selector.select_tier(&heavy(), &at_cpu(0.0), &DegradationState::new());
        assert_eq!(decision.tier_id, "b");
    }

    #[test]
    fn offloaded_mode_uses_remote_when_configured() {
        let offloaded = DegradationState::in_mode(DegradationMode::Offloaded);
        let decision = selector(true).select_tier(&heavy(), &at_cpu(95.0), &offloaded);
        assert!(decision.use_remote);
        assert_eq!(decision.tier_id, "standard");

        let decision = selector(false).select_tier(&heavy(), &at_cpu(95.0), &offloaded);
        assert!(!decision.use_remote);
        assert_eq!(decision.tier_id, "tiny");
    }

    #[test]
    fn excluding_remote_falls_back_to_local_pressure() {
        let offloaded = DegradationState::in_mode(DegradationMode::Offloaded);
        let decision = selector(true).select_tier_without_remote(
            &heavy(),
            &at_cpu(95.0),
            &offloaded,
            "probe timed out",
        );
        assert!(!decision.use_remote);
        assert_eq!(decision.tier_id, "tiny");
        assert!(decision.rationale.contains("probe timed out"));
    }

    #[test]
    fn remote_incapable_tier_stays_local() {
        let config = TierConfig {
            tiers: vec![
                TierSpec::new("a", "m-a", 0.0, 1),
                TierSpec::new("b", "m-b", 0.5, 2),
                TierSpec::new("c", "m-c", 0.9, 3),
            ],
            light_cost_factor: 0.5,
        };
        let selector = TierSelector::new(config, PressureThresholds::default(), true);
        let offloaded = DegradationState::in_mode(DegradationMode::Offloaded);
        let decision = selector.select_tier(&heavy(), &at_cpu(95.0), &offloaded);
        assert!(!decision.use_remote);
        assert_eq!(decision.tier_id, "a");
    }

    #[test]
    fn empty_table_falls_back_to_minimal_tier() {
        let config = TierConfig {
            tiers: Vec::new(),
            light_cost_factor: 0.5,
        };
        let selector = TierSelector::new(config, PressureThresholds::default(), true);
        let decision = selector.select_tier(&heavy(), &at_cpu(10.0), &DegradationState::new());
        assert_eq!(decision.max_parallel_workers, 1);
        assert!(!decision.use_remote);
    }

    #[test]
    fn selection_is_deterministic() {
        let selector = selector(true);
        let snapshot = at_cpu(33.0);
        let state = DegradationState::new();
        let first = selector.select_tier(&heavy(), &snapshot, &state);
        for _ in 0..10 {
            assert_eq!(selector.select_tier(&heavy(), &snapshot, &state), first);
        }
    }
}
