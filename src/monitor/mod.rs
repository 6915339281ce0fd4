//! Host resource sampling.
//!
//! [`ResourceMonitor`] is the single writer: it owns the sensors and the
//! trailing ring, and after every successful poll publishes an immutable copy
//! of the ring through a `watch` channel. Everything else reads through a
//! cloned [`MonitorHandle`] without locking.

mod config;
mod pressure;
mod sensors;
mod types;

pub use config::{MonitorConfig, PressureThresholds};
pub use pressure::{pressure_breakdown, pressure_score, PressureBreakdown};
pub use sensors::{GpuProbe, HostSensors, SensorSource};
pub use types::{SystemSnapshot, TrailingWindow};

use std::{sync::Arc, time::Instant};

use chrono::Utc;
use tokio::sync::watch;

use crate::error::SensorError;

// Set to false to silence per-poll warnings
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

pub struct ResourceMonitor {
    sensors: Box<dyn SensorSource>,
    window: TrailingWindow,
    publisher: watch::Sender<Arc<TrailingWindow>>,
    poll_budget_ms: u64,
    skipped_polls: u64,
}

impl ResourceMonitor {
    pub fn new(sensors: Box<dyn SensorSource>, config: &MonitorConfig) -> Self {
        let window = TrailingWindow::new(config.history_capacity);
        let (publisher, _) = watch::channel(Arc::new(window.clone()));

        Self {
            sensors,
            window,
            publisher,
            poll_budget_ms: config.poll_budget_ms,
            skipped_polls: 0,
        }
    }

    pub fn handle(&self) -> MonitorHandle {
        MonitorHandle {
            receiver: self.publisher.subscribe(),
        }
    }

    /// Take one sample and publish it.
    ///
    /// GPU and temperature failures leave those fields `None`. A CPU or memory
    /// failure skips the sample entirely; the previous snapshot (or a nominal
    /// one before the first success) is returned instead.
    pub fn poll(&mut self) -> SystemSnapshot {
        let started = Instant::now();

        let core = self
            .sensors
            .cpu_percent()
            .and_then(|cpu| self.sensors.mem_available_bytes().map(|mem| (cpu, mem)));

        let (cpu_percent, mem_available_bytes) = match core {
            Ok(values) => values,
            Err(err) => {
                self.skipped_polls += 1;
                log_warn!(
                    "skipping resource sample ({err}); {} samples skipped so far",
                    self.skipped_polls
                );
                return self
                    .window
                    .latest()
                    .unwrap_or_else(|| SystemSnapshot::nominal(Utc::now()));
            }
        };

        let snapshot = SystemSnapshot {
            timestamp: Utc::now(),
            cpu_percent,
            mem_available_bytes,
            gpu_percent: optional_reading(self.sensors.gpu_percent()),
            temperature_c: optional_reading(self.sensors.temperature_c()),
        };

        self.window.push(snapshot);
        self.publisher.send_replace(Arc::new(self.window.clone()));

        let elapsed_ms = started.elapsed().as_millis();
        if elapsed_ms > u128::from(self.poll_budget_ms) {
            log_warn!(
                "resource poll took {}ms (budget {}ms)",
                elapsed_ms,
                self.poll_budget_ms
            );
        }

        snapshot
    }

    pub fn latest(&self) -> Option<SystemSnapshot> {
        self.window.latest()
    }

    /// Average of the last `window_n` samples, or nominal before any sample.
    pub fn trailing_average(&self, window_n: usize) -> SystemSnapshot {
        self.window
            .average(window_n)
            .unwrap_or_else(|| SystemSnapshot::nominal(Utc::now()))
    }

    pub fn trailing_peak(&self, window_n: usize) -> SystemSnapshot {
        self.window
            .peak(window_n)
            .unwrap_or_else(|| SystemSnapshot::nominal(Utc::now()))
    }

    pub fn skipped_polls(&self) -> u64 {
        self.skipped_polls
    }
}

fn optional_reading<T>(reading: Result<T, SensorError>) -> Option<T> {
    match reading {
        Ok(value) => Some(value),
        Err(err) => {
            log_debug!("{err}; treating as nominal");
            None
        }
    }
}

/// Lock-free read side of the monitor.
#[derive(Clone)]
pub struct MonitorHandle {
    receiver: watch::Receiver<Arc<TrailingWindow>>,
}

impl MonitorHandle {
    pub fn history(&self) -> Arc<TrailingWindow> {
        Arc::clone(&self.receiver.borrow())
    }

    pub fn latest(&self) -> Option<SystemSnapshot> {
        self.receiver.borrow().latest()
    }

    pub fn trailing_average(&self, window_n: usize) -> Option<SystemSnapshot> {
        self.receiver.borrow().average(window_n)
    }

    pub fn trailing_peak(&self, window_n: usize) -> Option<SystemSnapshot> {
        self.receiver.borrow().peak(window_n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{ScriptedReading, ScriptedSensors};

    const GIB: u64 = 1024 * 1024 * 1024;

    fn config(capacity: usize) -> MonitorConfig {
        MonitorConfig {
            history_capacity: capacity,
            ..MonitorConfig::default()
        }
    }

    #[test]
    fn poll_publishes_to_handles() {
        let sensors = ScriptedSensors::new(vec![ScriptedReading::ok(35.0, 12 * GIB)]);
        let mut monitor = ResourceMonitor::new(Box::new(sensors), &config(20));
        let handle = monitor.handle();

        assert!(handle.latest().is_none());
        let snapshot = monitor.poll();

        assert_eq!(handle.latest(), Some(snapshot));
        assert_eq!(snapshot.cpu_percent, 35.0);
        assert_eq!(snapshot.mem_available_bytes, 12 * GIB);
    }

    #[test]
    fn missing_gpu_and_thermal_sensors_are_none() {
        let sensors = ScriptedSensors::new(vec![ScriptedReading::ok(10.0, 4 * GIB)]);
        let mut monitor = ResourceMonitor::new(Box::new(sensors), &config(20));

        let snapshot = monitor.poll();
        assert_eq!(snapshot.gpu_percent, None);
        assert_eq!(snapshot.temperature_c, None);
    }

    #[test]
    fn failed_core_sample_is_skipped() {
        let sensors = ScriptedSensors::new(vec![
            ScriptedReading::ok(20.0, 8 * GIB),
            ScriptedReading::cpu_failure(),
            ScriptedReading::ok(40.0, 8 * GIB),
        ]);
        let mut monitor = ResourceMonitor::new(Box::new(sensors), &config(20));
        let handle = monitor.handle();

        let first = monitor.poll();
        let second = monitor.poll();
        monitor.poll();

        assert_eq!(second, first);
        assert_eq!(monitor.skipped_polls(), 1);
        assert_eq!(handle.history().len(), 2);
    }

    #[test]
    fn ring_is_bounded() {
        let readings = (0..30)
            .map(|i| ScriptedReading::ok(i as f32, 8 * GIB))
            .collect();
        let mut monitor = ResourceMonitor::new(Box::new(ScriptedSensors::new(readings)), &config(20));
        for _ in 0..30 {
            monitor.poll();
        }

        let history = monitor.handle().history();
        assert_eq!(history.len(), 20);
        assert_eq!(history.iter().next().map(|s| s.cpu_percent), Some(10.0));
        assert_eq!(monitor.latest().map(|s| s.cpu_percent), Some(29.0));
    }

    #[test]
    fn trailing_average_before_first_poll_is_nominal() {
        let monitor = ResourceMonitor::new(Box::new(ScriptedSensors::new(Vec::new())), &config(20));
        let avg = monitor.trailing_average(3);
        assert_eq!(avg.cpu_percent, 0.0);
        assert_eq!(avg.mem_available_bytes, u64::MAX);
    }
}
