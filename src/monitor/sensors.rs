use sysinfo::{Components, System};

use crate::error::SensorError;

/// Raw host readings. Each read is independent so one missing sensor never
/// hides the others.
pub trait SensorSource: Send {
    fn cpu_percent(&mut self) -> Result<f32, SensorError>;
    fn mem_available_bytes(&mut self) -> Result<u64, SensorError>;
    fn gpu_percent(&mut self) -> Result<f32, SensorError>;
    fn temperature_c(&mut self) -> Result<f32, SensorError>;
}

/// GPU utilisation hook. `sysinfo` has no GPU support, so vendor adapters
/// (NVML, ROCm SMI, Metal counters) plug in here.
pub trait GpuProbe: Send {
    fn utilization_percent(&mut self) -> Result<f32, SensorError>;
}

/// `sysinfo`-backed sensors for the current host.
pub struct HostSensors {
    system: System,
    components: Components,
    gpu: Option<Box<dyn GpuProbe>>,
}

impl HostSensors {
    pub fn new() -> Self {
        let mut system = System::new();
        // CPU usage is a delta between refreshes; take the baseline now.
        system.refresh_cpu_usage();
        system.refresh_memory();

        Self {
            system,
            components: Components::new_with_refreshed_list(),
            gpu: None,
        }
    }

    pub fn with_gpu_probe(mut self, probe: Box<dyn GpuProbe>) -> Self {
        self.gpu = Some(probe);
        self
    }
}

impl Default for HostSensors {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorSource for HostSensors {
    fn cpu_percent(&mut self) -> Result<f32, SensorError> {
        if !sysinfo::IS_SUPPORTED_SYSTEM {
            return Err(SensorError::Unavailable { sensor: "cpu" });
        }
        self.system.refresh_cpu_usage();
        let usage = self.system.global_cpu_usage();
        if usage.is_finite() {
            Ok(usage)
        } else {
            Err(SensorError::Unavailable { sensor: "cpu" })
        }
    }

    fn mem_available_bytes(&mut self) -> Result<u64, SensorError> {
        self.system.refresh_memory();
        if self.system.total_memory() == 0 {
            return Err(SensorError::Unavailable { sensor: "memory" });
        }
        Ok(self.system.available_memory())
    }

    fn gpu_percent(&mut self) -> Result<f32, SensorError> {
        match self.gpu.as_mut() {
            Some(probe) => probe.utilization_percent(),
            None => Err(SensorError::Unavailable { sensor: "gpu" }),
        }
    }

    fn temperature_c(&mut self) -> Result<f32, SensorError> {
        self.components.refresh();
        self.components
            .list()
            .iter()
            .map(|component| component.temperature())
            .filter(|temp| temp.is_finite() && *temp > 0.0)
            .fold(None, |hottest: Option<f32>, temp| {
                Some(hottest.map_or(temp, |h| h.max(temp)))
            })
            .ok_or(SensorError::Unavailable {
                sensor: "temperature",
            })
    }
}
