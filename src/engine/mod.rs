//! Engine facade: `submit`, `invalidate` and `health`, plus the background
//! monitor loop and cache sweeper.

mod loop_worker;
mod types;

pub use types::{HealthReport, Invalidation, ResultSource, SubmitOptions, SubmitOutcome};

use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use tokio::{task::JoinHandle, time::Duration};
use tokio_util::sync::CancellationToken;

use crate::{
    cache::{CacheKey, CacheSweeper, MultiTierCache, NetworkCache},
    degradation::{AdmissionGate, DegradationController, Transition},
    dispatch::{Dispatcher, JobReport, ModelRuntime},
    error::{DispatchError, TierError},
    models::TaskProfile,
    monitor::{pressure_score, HostSensors, MonitorHandle, ResourceMonitor, SensorSource, SystemSnapshot},
    settings::EngineSettings,
    tiers::TierSelector,
};

use loop_worker::monitor_loop;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Shared state reachable from both the request path and background tasks.
pub(crate) struct EngineCore {
    settings: EngineSettings,
    monitor: Mutex<ResourceMonitor>,
    monitor_handle: MonitorHandle,
    degradation: Mutex<DegradationController>,
    gate: AdmissionGate,
    selector: TierSelector,
    cache: Arc<MultiTierCache>,
    dispatcher: Dispatcher,
}

impl EngineCore {
    /// One poll plus one degradation observation. A skipped poll is not
    /// observed. The snapshot is published before the remote probe, so a
    /// hung remote cannot starve the monitor.
    pub(crate) async fn tick(&self) -> Option<Transition> {
        let snapshot = {
            let mut monitor = lock(&self.monitor);
            let skipped_before = monitor.skipped_polls();
            let snapshot = monitor.poll();
            if monitor.skipped_polls() != skipped_before {
                return None;
            }
            snapshot
        };

        let remote_available = self.dispatcher.remote_available().await;
        let pressure = pressure_score(&snapshot, &self.settings.monitor.thresholds);
        log_debug!(
            "tick: cpu {:.1}% pressure {:.2} remote={}",
            snapshot.cpu_percent,
            pressure,
            remote_available
        );
        lock(&self.degradation).observe(pressure, remote_available)
    }

    fn smoothed_snapshot(&self) -> SystemSnapshot {
        self.monitor_handle
            .trailing_average(self.settings.monitor.smoothing_window)
            .unwrap_or_else(|| SystemSnapshot::nominal(Utc::now()))
    }
}

#[derive(Default)]
struct Background {
    monitor_task: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
    sweeper: CacheSweeper,
}

pub struct Engine {
    core: Arc<EngineCore>,
    background: tokio::sync::Mutex<Background>,
}

impl Engine {
    /// Wire every component from `settings`.
    ///
    /// Must run inside a Tokio runtime when a network cache is supplied.
    pub fn open(
        settings: EngineSettings,
        sensors: Box<dyn SensorSource>,
        local: Arc<dyn ModelRuntime>,
        remote: Option<Arc<dyn ModelRuntime>>,
        network: Option<Arc<dyn NetworkCache>>,
    ) -> Result<Self> {
        settings.validate().map_err(DispatchError::Config)?;

        let monitor = ResourceMonitor::new(sensors, &settings.monitor);
        let monitor_handle = monitor.handle();

        let degradation = DegradationController::new(settings.degradation.clone());
        let gate = degradation.gate();

        let selector = TierSelector::new(
            settings.tiers.clone(),
            settings.monitor.thresholds.clone(),
            remote.is_some(),
        );

        let cache = Arc::new(
            MultiTierCache::open(&settings.cache, network).context("failed to open result cache")?,
        );
        let dispatcher = Dispatcher::new(local, remote, Arc::clone(&cache), settings.dispatch.clone());

        log_info!(
            "engine ready: {} tiers, remote runtime {}, network cache {}",
            settings.tiers.tiers.len(),
            if dispatcher.has_remote() { "configured" } else { "absent" },
            if cache.has_network_tier() { "configured" } else { "absent" }
        );

        Ok(Self {
            core: Arc::new(EngineCore {
                settings,
                monitor: Mutex::new(monitor),
                monitor_handle,
                degradation: Mutex::new(degradation),
                gate,
                selector,
                cache,
                dispatcher,
            }),
            background: tokio::sync::Mutex::new(Background::default()),
        })
    }

    /// [`Engine::open`] with `sysinfo` host sensors.
    pub fn with_host_sensors(
        settings: EngineSettings,
        local: Arc<dyn ModelRuntime>,
        remote: Option<Arc<dyn ModelRuntime>>,
        network: Option<Arc<dyn NetworkCache>>,
    ) -> Result<Self> {
        Self::open(settings, Box::new(HostSensors::new()), local, remote, network)
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.core.settings
    }

    pub fn cache(&self) -> &Arc<MultiTierCache> {
        &self.core.cache
    }

    /// Cached result if there is one; otherwise admission, tier selection,
    /// dispatch and cache write.
    pub async fn submit(
        &self,
        profile: &TaskProfile,
        input: &[u8],
        options: SubmitOptions,
    ) -> Result<SubmitOutcome, DispatchError> {
        let core = &self.core;
        profile.validate().map_err(DispatchError::Config)?;
        let key = CacheKey::for_input(&profile.name, input);

        if let Some(hit) = core.cache.lookup(key.as_str()).await {
            return Ok(SubmitOutcome {
                value: hit.value,
                source: ResultSource::Cache(hit.tier),
            });
        }

        let cancel = options.cancel.unwrap_or_else(CancellationToken::new);
        if let Err(err) = core
            .gate
            .admit(key.as_str(), options.no_wait, options.max_wait, &cancel)
            .await
        {
            if matches!(err, DispatchError::DegradedRejection { .. }) {
                core.dispatcher.record_rejection();
            }
            return Err(err);
        }

        let snapshot = core.smoothed_snapshot();
        let state = core.gate.current();
        let mut decision = core.selector.select_tier(profile, &snapshot, &state);

        if decision.use_remote && !core.dispatcher.remote_available().await {
            let err = TierError::Unreachable {
                reason: "reachability probe failed".into(),
            };
            log_warn!("{err}; dispatching {key} locally");
            decision = core
                .selector
                .select_tier_without_remote(profile, &snapshot, &state, &err.to_string());
        }

        let output = core.dispatcher.dispatch(profile, input, decision, &cancel).await?;
        Ok(SubmitOutcome {
            value: output.value,
            source: ResultSource::Computed(output.report),
        })
    }

    /// [`Engine::submit`] with a profile from the settings.
    pub async fn submit_named(
        &self,
        profile_name: &str,
        input: &[u8],
        options: SubmitOptions,
    ) -> Result<SubmitOutcome, DispatchError> {
        let profile = self
            .core
            .settings
            .profile(profile_name)
            .cloned()
            .ok_or_else(|| DispatchError::Config(format!("unknown task profile '{profile_name}'")))?;
        self.submit(&profile, input, options).await
    }

    /// Returns the number of local entries removed.
    pub async fn invalidate(&self, target: Invalidation) -> usize {
        match target {
            Invalidation::Key(key) => self.core.cache.invalidate(&key).await,
            Invalidation::Prefix(prefix) => self.core.cache.invalidate_prefix(&prefix).await,
        }
    }

    pub async fn health(&self) -> HealthReport {
        let core = &self.core;
        let state = core.gate.current();
        let last_snapshot = core.monitor_handle.latest();
        let pressure = last_snapshot
            .as_ref()
            .map(|snapshot| pressure_score(snapshot, &core.settings.monitor.thresholds));
        let recent_transitions = lock(&core.degradation).recent_transitions();
        let skipped_polls = lock(&core.monitor).skipped_polls();

        HealthReport {
            mode: state.current_mode,
            consecutive_breaches: state.consecutive_breaches,
            last_snapshot,
            pressure,
            cache_stats: core.cache.stats().await,
            dispatch_stats: core.dispatcher.stats_snapshot(),
            recent_transitions,
            skipped_polls,
        }
    }

    pub fn recent_jobs(&self, limit: usize) -> Vec<JobReport> {
        self.core.dispatcher.recent_jobs(limit)
    }

    /// Poll once and update the degradation state. The background loop calls
    /// this on every interval.
    pub async fn tick(&self) -> Option<Transition> {
        self.core.tick().await
    }

    pub async fn start_background(&self) -> Result<()> {
        let mut background = self.background.lock().await;
        if background.monitor_task.is_some() {
            bail!("engine background tasks already running");
        }

        let interval = Duration::from_millis(self.core.settings.monitor.poll_interval_ms);
        let cancel_token = CancellationToken::new();
        let task = tokio::spawn(monitor_loop(
            Arc::clone(&self.core),
            interval,
            cancel_token.clone(),
        ));

        background.sweeper.start(
            Arc::clone(&self.core.cache),
            Duration::from_secs(self.core.settings.cache.sweep_interval_secs),
        )?;
        background.monitor_task = Some(task);
        background.cancel_token = Some(cancel_token);

        log_info!("engine background tasks started (poll every {}ms)", interval.as_millis());
        Ok(())
    }

    pub async fn shutdown(&self) -> Result<()> {
        let mut background = self.background.lock().await;

        if let Some(token) = background.cancel_token.take() {
            token.cancel();
        }
        if let Some(task) = background.monitor_task.take() {
            task.await.context("monitor loop task failed to join")?;
        }
        background.sweeper.stop().await?;
        self.core.cache.flush_network().await;

        log_info!("engine stopped");
        Ok(())
    }
}
