//! Test doubles for sensors, model runtimes and the network cache.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{
    cache::{LoopbackNetworkCache, NetworkCache, NetworkRecord},
    dispatch::ModelRuntime,
    error::SensorError,
    monitor::SensorSource,
    tiers::TierDecision,
};

/// One scripted poll. `None` core readings simulate a failed sensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScriptedReading {
    pub cpu: Option<f32>,
    pub mem: Option<u64>,
    pub gpu: Option<f32>,
    pub temperature: Option<f32>,
}

impl ScriptedReading {
    pub fn ok(cpu: f32, mem: u64) -> Self {
        Self {
            cpu: Some(cpu),
            mem: Some(mem),
            gpu: None,
            temperature: None,
        }
    }

    pub fn cpu_failure() -> Self {
        Self {
            cpu: None,
            mem: Some(u64::MAX),
            gpu: None,
            temperature: None,
        }
    }

    pub fn with_gpu(mut self, gpu: f32) -> Self {
        self.gpu = Some(gpu);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

#[derive(Default)]
struct ScriptState {
    queue: VecDeque<ScriptedReading>,
    current: Option<ScriptedReading>,
}

/// Replays readings in order. `cpu_percent` advances to the next reading
/// (it is read first on every poll); once the script runs out the last
/// reading repeats. Clones share the script.
#[derive(Clone, Default)]
pub struct ScriptedSensors {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedSensors {
    pub fn new(readings: Vec<ScriptedReading>) -> Self {
        Self {
            state: Arc::new(Mutex::new(ScriptState {
                queue: readings.into(),
                current: None,
            })),
        }
    }

    pub fn push(&self, reading: ScriptedReading) {
        self.state.lock().unwrap().queue.push_back(reading);
    }

    fn current(&self) -> Option<ScriptedReading> {
        self.state.lock().unwrap().current
    }
}

impl SensorSource for ScriptedSensors {
    fn cpu_percent(&mut self) -> Result<f32, SensorError> {
        let mut state = self.state.lock().unwrap();
        if let Some(next) = state.queue.pop_front() {
            state.current = Some(next);
        }
        state
            .current
            .and_then(|reading| reading.cpu)
            .ok_or(SensorError::Unavailable { sensor: "cpu" })
    }

    fn mem_available_bytes(&mut self) -> Result<u64, SensorError> {
        self.current()
            .and_then(|reading| reading.mem)
            .ok_or(SensorError::Unavailable { sensor: "memory" })
    }

    fn gpu_percent(&mut self) -> Result<f32, SensorError> {
        self.current()
            .and_then(|reading| reading.gpu)
            .ok_or(SensorError::Unavailable { sensor: "gpu" })
    }

    fn temperature_c(&mut self) -> Result<f32, SensorError> {
        self.current()
            .and_then(|reading| reading.temperature)
            .ok_or(SensorError::Unavailable { sensor: "temperature" })
    }
}

/// Behaviour of one refinement worker.
#[derive(Debug, Clone)]
pub enum WorkerScript {
    Output(Vec<u8>),
    Delayed(Duration, Vec<u8>),
    Fail(String),
    Hang,
    /// Cancel the job's token, then report normally.
    CancelThenOutput(CancellationToken, Vec<u8>),
}

impl WorkerScript {
    pub fn output(text: &str) -> Self {
        WorkerScript::Output(text.as_bytes().to_vec())
    }
}

/// Model runtime driven by a script. Unscripted workers echo the initial
/// output.
pub struct ScriptedRuntime {
    name: String,
    prediction: Result<Vec<u8>, String>,
    predict_delay: Duration,
    probe_delay: Duration,
    workers: HashMap<usize, WorkerScript>,
    available: AtomicBool,
    predict_calls: AtomicUsize,
    refine_calls: AtomicUsize,
}

impl ScriptedRuntime {
    pub fn new(name: &str, initial: &str) -> Self {
        Self {
            name: name.to_string(),
            prediction: Ok(initial.as_bytes().to_vec()),
            predict_delay: Duration::ZERO,
            probe_delay: Duration::ZERO,
            workers: HashMap::new(),
            available: AtomicBool::new(true),
            predict_calls: AtomicUsize::new(0),
            refine_calls: AtomicUsize::new(0),
        }
    }

    pub fn failing_prediction(mut self, message: &str) -> Self {
        self.prediction = Err(message.to_string());
        self
    }

    pub fn with_predict_delay(mut self, delay: Duration) -> Self {
        self.predict_delay = delay;
        self
    }

    pub fn with_probe_delay(mut self, delay: Duration) -> Self {
        self.probe_delay = delay;
        self
    }

    pub fn with_worker(mut self, index: usize, script: WorkerScript) -> Self {
        self.workers.insert(index, script);
        self
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn predict_calls(&self) -> usize {
        self.predict_calls.load(Ordering::SeqCst)
    }

    pub fn refine_calls(&self) -> usize {
        self.refine_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelRuntime for ScriptedRuntime {
    fn name(&self) -> &str {
        &self.name
    }

    async fn predict(&self, _decision: &TierDecision, _input: &[u8]) -> Result<Vec<u8>> {
        self.predict_calls.fetch_add(1, Ordering::SeqCst);
        if !self.predict_delay.is_zero() {
            tokio::time::sleep(self.predict_delay).await;
        }
        self.prediction.clone().map_err(|message| anyhow!(message))
    }

    async fn refine(
        &self,
        _decision: &TierDecision,
        worker_index: usize,
        initial: &[u8],
    ) -> Result<Vec<u8>> {
        self.refine_calls.fetch_add(1, Ordering::SeqCst);
        match self.workers.get(&worker_index).cloned() {
            None => Ok(initial.to_vec()),
            Some(WorkerScript::Output(output)) => Ok(output),
            Some(WorkerScript::Delayed(delay, output)) => {
                tokio::time::sleep(delay).await;
                Ok(output)
            }
            Some(WorkerScript::Fail(message)) => Err(anyhow!(message)),
            Some(WorkerScript::CancelThenOutput(cancel, output)) => {
                cancel.cancel();
                Ok(output)
            }
            Some(WorkerScript::Hang) => {
                std::future::pending::<()>().await;
                Ok(Vec::new())
            }
        }
    }

    async fn is_available(&self) -> bool {
        if !self.probe_delay.is_zero() {
            tokio::time::sleep(self.probe_delay).await;
        }
        self.available.load(Ordering::SeqCst)
    }
}

/// Network cache that is slow or broken.
pub struct FlakyNetworkCache {
    delay: Duration,
    fail: bool,
}

impl FlakyNetworkCache {
    pub fn slow(delay: Duration) -> Self {
        Self { delay, fail: false }
    }

    pub fn failing() -> Self {
        Self {
            delay: Duration::ZERO,
            fail: true,
        }
    }

    async fn respond<T>(&self, value: T) -> Result<T> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            Err(anyhow!("connection refused"))
        } else {
            Ok(value)
        }
    }
}

#[async_trait]
impl NetworkCache for FlakyNetworkCache {
    async fn get(&self, _key: &str) -> Result<Option<NetworkRecord>> {
        self.respond(None).await
    }

    async fn put(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> Result<()> {
        self.respond(()).await
    }

    async fn delete(&self, _key: &str) -> Result<()> {
        self.respond(()).await
    }

    async fn delete_prefix(&self, _prefix: &str) -> Result<()> {
        self.respond(()).await
    }
}

/// Loopback network cache whose deletes take `delete_delay` before landing.
pub struct SlowDeleteNetworkCache {
    inner: LoopbackNetworkCache,
    delete_delay: Duration,
}

impl SlowDeleteNetworkCache {
    pub fn new(delete_delay: Duration) -> Self {
        Self {
            inner: LoopbackNetworkCache::new(),
            delete_delay,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.contains(key)
    }
}

#[async_trait]
impl NetworkCache for SlowDeleteNetworkCache {
    async fn get(&self, key: &str) -> Result<Option<NetworkRecord>> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        self.inner.put(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        tokio::time::sleep(self.delete_delay).await;
        self.inner.delete(key).await
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<()> {
        tokio::time::sleep(self.delete_delay).await;
        self.inner.delete_prefix(prefix).await
    }
}
