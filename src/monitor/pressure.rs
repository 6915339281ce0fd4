use serde::Serialize;

use super::{config::PressureThresholds, types::SystemSnapshot};

/// Per-resource pressure, each clamped to `[0, 1]`.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PressureBreakdown {
    pub cpu: f64,
    pub memory: f64,
    pub gpu: f64,
    pub temperature: f64,
}

impl PressureBreakdown {
    /// The overall score is the single worst resource.
    pub fn score(&self) -> f64 {
        self.cpu.max(self.memory).max(self.gpu).max(self.temperature)
    }

    /// Name of the resource driving the score, for rationale strings.
    pub fn dominant(&self) -> &'static str {
        let pairs = [
            ("cpu", self.cpu),
            ("memory", self.memory),
            ("gpu", self.gpu),
            ("temperature", self.temperature),
        ];
        pairs
            .iter()
            .fold(("cpu", f64::MIN), |best, &(name, value)| {
                if value > best.1 {
                    (name, value)
                } else {
                    best
                }
            })
            .0
    }
}

pub fn pressure_breakdown(
    snapshot: &SystemSnapshot,
    thresholds: &PressureThresholds,
) -> PressureBreakdown {
    let cpu = ramp(f64::from(snapshot.cpu_percent), 0.0, f64::from(thresholds.cpu_critical_percent));

    let memory = {
        let nominal = thresholds.memory_nominal_bytes as f64;
        let critical = thresholds.memory_critical_bytes as f64;
        let available = snapshot.mem_available_bytes as f64;
        if nominal <= critical {
            if available <= critical { 1.0 } else { 0.0 }
        } else {
            clamp_unit((nominal - available) / (nominal - critical))
        }
    };

    // Missing sensors read as nominal.
    let gpu = snapshot
        .gpu_percent
        .map(|gpu| ramp(f64::from(gpu), 0.0, f64::from(thresholds.gpu_critical_percent)))
        .unwrap_or(0.0);

    let temperature = snapshot
        .temperature_c
        .map(|temp| {
            ramp(
                f64::from(temp),
                f64::from(thresholds.temperature_nominal_c),
                f64::from(thresholds.temperature_critical_c),
            )
        })
        .unwrap_or(0.0);

    PressureBreakdown {
        cpu,
        memory,
        gpu,
        temperature,
    }
}

pub fn pressure_score(snapshot: &SystemSnapshot, thresholds: &PressureThresholds) -> f64 {
    pressure_breakdown(snapshot, thresholds).score()
}

fn ramp(value: f64, nominal: f64, critical: f64) -> f64 {
    if critical <= nominal {
        return if value >= critical { 1.0 } else { 0.0 };
    }
    clamp_unit((value - nominal) / (critical - nominal))
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    const GIB: u64 = 1024 * 1024 * 1024;

    fn snapshot(cpu: f32, mem: u64, gpu: Option<f32>, temp: Option<f32>) -> SystemSnapshot {
        SystemSnapshot {
            timestamp: Utc::now(),
            cpu_percent: cpu,
            mem_available_bytes: mem,
            gpu_percent: gpu,
            temperature_c: temp,
        }
    }

    #[test]
    fn idle_host_scores_zero() {
        let thresholds = PressureThresholds::default();
        let score = pressure_score(&snapshot(0.0, 16 * GIB, None, None), &thresholds);
        assert_eq!(score, 0.0);
    }

    #[test]
    fn score_is_max_of_resources() {
        let thresholds = PressureThresholds::default();
        let breakdown = pressure_breakdown(&snapshot(45.0, 16 * GIB, Some(19.0), Some(65.0)), &thresholds);

        assert!((breakdown.cpu - 0.5).abs() < 1e-9);
        assert!((breakdown.gpu - 0.2).abs() < 1e-9);
        assert!((breakdown.temperature - 0.5).abs() < 1e-9);
        assert_eq!(breakdown.memory, 0.0);
        assert!((breakdown.score() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn at_or_past_critical_saturates() {
        let thresholds = PressureThresholds::default();
        assert_eq!(pressure_score(&snapshot(99.0, 16 * GIB, None, None), &thresholds), 1.0);
        assert_eq!(pressure_score(&snapshot(5.0, GIB / 2, None, None), &thresholds), 1.0);
        assert_eq!(pressure_score(&snapshot(5.0, 16 * GIB, None, Some(95.0)), &thresholds), 1.0);
    }

    #[test]
    fn memory_deficit_ramps_between_nominal_and_critical() {
        let thresholds = PressureThresholds::default();
        let breakdown = pressure_breakdown(&snapshot(0.0, 4 * GIB + GIB / 2, None, None), &thresholds);
        assert!((breakdown.memory - 0.5).abs() < 1e-9);
        assert_eq!(breakdown.dominant(), "memory");
    }

    #[test]
    fn nominal_snapshot_has_no_pressure() {
        let thresholds = PressureThresholds::default();
        assert_eq!(pressure_score(&SystemSnapshot::nominal(Utc::now()), &thresholds), 0.0);
    }
}
