use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Point-in-time host resource reading. Immutable once produced.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SystemSnapshot {
    pub timestamp: DateTime<Utc>,
    pub cpu_percent: f32,
    pub mem_available_bytes: u64,
    /// `None` when no GPU probe is present or it failed.
    pub gpu_percent: Option<f32>,
    /// `None` when the host exposes no thermal sensor.
    pub temperature_c: Option<f32>,
}

impl SystemSnapshot {
    /// A snapshot that every consumer reads as "no pressure at all".
    pub fn nominal(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            cpu_percent: 0.0,
            mem_available_bytes: u64::MAX,
            gpu_percent: None,
            temperature_c: None,
        }
    }
}

/// Bounded FIFO of the most recent snapshots, oldest first.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrailingWindow {
    capacity: usize,
    samples: VecDeque<SystemSnapshot>,
}

impl TrailingWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, snapshot: SystemSnapshot) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(snapshot);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn latest(&self) -> Option<SystemSnapshot> {
        self.samples.back().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SystemSnapshot> {
        self.samples.iter()
    }

    fn recent(&self, window_n: usize) -> impl Iterator<Item = &SystemSnapshot> {
        let n = window_n.max(1).min(self.samples.len());
        self.samples.iter().skip(self.samples.len() - n)
    }

    /// Mean of the last `window_n` samples. Optional fields average over the
    /// samples that actually carried a value.
    pub fn average(&self, window_n: usize) -> Option<SystemSnapshot> {
        let latest = self.latest()?;

        let mut count = 0u32;
        let mut cpu_sum = 0.0f64;
        let mut mem_sum = 0u128;
        let mut gpu = OptionalMean::default();
        let mut temp = OptionalMean::default();

        for sample in self.recent(window_n) {
            count += 1;
            cpu_sum += f64::from(sample.cpu_percent);
            mem_sum += u128::from(sample.mem_available_bytes);
            gpu.add(sample.gpu_percent);
            temp.add(sample.temperature_c);
        }

        Some(SystemSnapshot {
            timestamp: latest.timestamp,
            cpu_percent: (cpu_sum / f64::from(count)) as f32,
            mem_available_bytes: (mem_sum / u128::from(count)) as u64,
            gpu_percent: gpu.mean(),
            temperature_c: temp.mean(),
        })
    }

    /// Worst reading per field over the last `window_n` samples: highest
    /// CPU/GPU/temperature and lowest available memory.
    pub fn peak(&self, window_n: usize) -> Option<SystemSnapshot> {
        let latest = self.latest()?;
        let mut peak = SystemSnapshot {
            timestamp: latest.timestamp,
            cpu_percent: 0.0,
            mem_available_bytes: u64::MAX,
            gpu_percent: None,
            temperature_c: None,
        };

        for sample in self.recent(window_n) {
            peak.cpu_percent = peak.cpu_percent.max(sample.cpu_percent);
            peak.mem_available_bytes = peak.mem_available_bytes.min(sample.mem_available_bytes);
            peak.gpu_percent = max_optional(peak.gpu_percent, sample.gpu_percent);
            peak.temperature_c = max_optional(peak.temperature_c, sample.temperature_c);
        }

        Some(peak)
    }
}

#[derive(Default)]
struct OptionalMean {
    sum: f64,
    count: u32,
}

impl OptionalMean {
    fn add(&mut self, value: Option<f32>) {
        if let Some(v) = value {
            self.sum += f64::from(v);
            self.count += 1;
        }
    }

    fn mean(&self) -> Option<f32> {
        (self.count > 0).then(|| (self.sum / f64::from(self.count)) as f32)
    }
}

fn max_optional(current: Option<f32>, next: Option<f32>) -> Option<f32> {
    match (current, next) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}
