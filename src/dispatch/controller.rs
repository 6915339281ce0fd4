use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, Instant},
};

use tokio::{task::JoinSet, time::timeout};
use tokio_util::sync::CancellationToken;

use crate::{
    cache::{CacheKey, MultiTierCache},
    error::{DispatchError, WorkerError},
    models::TaskProfile,
    tiers::TierDecision,
};

use super::{
    config::DispatchConfig,
    job::{JobState, RefinementJob, WorkerResult},
    merge::merge_outputs,
    runtime::ModelRuntime,
    stats::{DispatchStats, DispatchStatsSnapshot, JobReport},
};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

const INITIAL_STAGE: &str = "initial";

/// Merged result of a completed job.
#[derive(Debug, Clone)]
pub struct DispatchOutput {
    pub value: Vec<u8>,
    pub report: JobReport,
}

/// Runs refinement jobs: one initial prediction, a fixed fan-out of
/// refinement workers, a deterministic merge, and the cache write.
pub struct Dispatcher {
    local: Arc<dyn ModelRuntime>,
    remote: Option<Arc<dyn ModelRuntime>>,
    cache: Arc<MultiTierCache>,
    config: DispatchConfig,
    stats: Mutex<DispatchStats>,
}

impl Dispatcher {
    pub fn new(
        local: Arc<dyn ModelRuntime>,
        remote: Option<Arc<dyn ModelRuntime>>,
        cache: Arc<MultiTierCache>,
        config: DispatchConfig,
    ) -> Self {
        let stats = Mutex::new(DispatchStats::new(config.history_capacity));
        Self {
            local,
            remote,
            cache,
            config,
            stats,
        }
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// Probe the remote runtime within the configured timeout.
    pub async fn remote_available(&self) -> bool {
        let Some(remote) = &self.remote else {
            return false;
        };
        match timeout(self.config.remote_probe_timeout(), remote.is_available()).await {
            Ok(available) => available,
            Err(_) => {
                log_warn!(
                    "remote runtime {} probe timed out after {:?}",
                    remote.name(),
                    self.config.remote_probe_timeout()
                );
                false
            }
        }
    }

    fn stats(&self) -> MutexGuard<'_, DispatchStats> {
        match self.stats.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn stats_snapshot(&self) -> DispatchStatsSnapshot {
        self.stats().snapshot()
    }

    pub fn recent_jobs(&self, limit: usize) -> Vec<JobReport> {
        self.stats().recent(limit)
    }

    pub fn record_rejection(&self) {
        self.stats().record_rejection();
    }

    pub async fn dispatch(
        &self,
        profile: &TaskProfile,
        input: &[u8],
        decision: TierDecision,
        cancel: &CancellationToken,
    ) -> Result<DispatchOutput, DispatchError> {
        let key = CacheKey::for_input(&profile.name, input);
        let mut job = RefinementJob::new(key, input.to_vec(), decision.max_parallel_workers);
        let deadline = self.config.job_deadline(decision.use_remote && self.remote.is_some());
        let started = Instant::now();

        log_debug!(
            "job {} started on tier {} ({} workers, remote={})",
            job.job_id,
            decision.tier_id,
            job.workers_requested,
            decision.use_remote
        );

        let outcome = timeout(deadline, self.compute(&mut job, profile, &decision, cancel)).await;
        let result = match outcome {
            Ok(Ok(merged)) => self.store(&mut job, profile, merged, cancel).await,
            Ok(Err(err)) => Err(err),
            Err(_) => {
                job.advance(JobState::Failed);
                log_error!("job {} exceeded its {:?} deadline", job.job_id, deadline);
                Err(DispatchError::JobTimeout {
                    job_id: job.job_id.clone(),
                    deadline,
                })
            }
        };

        let report = JobReport::from_job(
            &job,
            &profile.name,
            &decision,
            started.elapsed().as_millis() as u64,
        );
        self.stats().record(report.clone());

        match &result {
            Ok(_) => log_info!(
                "job {} done in {}ms with {}/{} refinements",
                report.job_id,
                report.total_ms,
                report.workers_succeeded,
                report.workers_requested
            ),
            Err(err) => log_warn!("job {} ended {}: {err}", report.job_id, report.state.as_str()),
        }

        result.map(|value| DispatchOutput { value, report })
    }

    /// Prediction, refinement and merge, all under the job deadline.
    async fn compute(
        &self,
        job: &mut RefinementJob,
        profile: &TaskProfile,
        decision: &TierDecision,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, DispatchError> {
        if cancel.is_cancelled() {
            return Err(cancelled(job));
        }

        let runtime = self.initial_prediction(job, profile, decision, cancel).await?;

        job.advance(JobState::Refining);
        let initial = match &job.initial_output {
            Some(initial) => Arc::clone(initial),
            None => {
                job.advance(JobState::Failed);
                return Err(DispatchError::PredictionFailed(
                    "initial prediction missing".into(),
                ));
            }
        };

        let results = tokio::select! {
            // refinements that have all reported win over a late cancel
            biased;
            results = self.refine_all(runtime, decision, initial, job.workers_requested) => results,
            _ = cancel.cancelled() => return Err(cancelled(job)),
        };
        job.finish_refinement(results);

        let successes = job.successful_outputs();
        if successes.is_empty() {
            job.advance(JobState::Failed);
            return Err(DispatchError::RefinementExhausted {
                attempted: job.workers_requested,
                timed_out: job.timed_out(),
                failed: job.failed(),
            });
        }

        // Past this point cancellation no longer interrupts; it only
        // suppresses the cache write.
        job.advance(JobState::Merging);
        match merge_outputs(profile.merge_rule, &successes) {
            Some(merged) => Ok(merged),
            None => {
                job.advance(JobState::Failed);
                Err(DispatchError::RefinementExhausted {
                    attempted: job.workers_requested,
                    timed_out: job.timed_out(),
                    failed: job.failed(),
                })
            }
        }
    }

    /// Write the merged result. Runs outside the deadline so a job never
    /// leaves a partial write behind.
    async fn store(
        &self,
        job: &mut RefinementJob,
        profile: &TaskProfile,
        merged: Vec<u8>,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, DispatchError> {
        if cancel.is_cancelled() {
            log_info!("job {} cancelled during merge; result not cached", job.job_id);
            return Err(cancelled(job));
        }

        let ttl = self.result_ttl(profile);
        self.cache.put(job.key.as_str(), merged.clone(), ttl).await;
        job.advance(JobState::Done);

        Ok(merged)
    }

    /// Produce the initial output and return the runtime the refinement
    /// workers should use.
    async fn initial_prediction(
        &self,
        job: &mut RefinementJob,
        profile: &TaskProfile,
        decision: &TierDecision,
        cancel: &CancellationToken,
    ) -> Result<Arc<dyn ModelRuntime>, DispatchError> {
        let stage_key = job.key.stage(INITIAL_STAGE);

        if self.config.reuse_initial_predictions {
            if let Some(initial) = self.cache.get(stage_key.as_str()).await {
                log_debug!("job {} reusing cached initial prediction", job.job_id);
                job.record_initial(initial, true);
                return Ok(self.preferred_runtime(decision));
            }
        }

        let input = Arc::clone(&job.input);
        let attempt = tokio::select! {
            attempt = self.predict_with_fallback(decision, &input) => attempt,
            _ = cancel.cancelled() => return Err(cancelled(job)),
        };

        match attempt {
            Ok((runtime, initial)) => {
                if self.config.reuse_initial_predictions {
                    self.cache
                        .put(stage_key.as_str(), initial.clone(), self.result_ttl(profile))
                        .await;
                }
                job.record_initial(initial, false);
                Ok(runtime)
            }
            Err(message) => {
                job.advance(JobState::Failed);
                Err(DispatchError::PredictionFailed(message))
            }
        }
    }

    fn preferred_runtime(&self, decision: &TierDecision) -> Arc<dyn ModelRuntime> {
        match (&self.remote, decision.use_remote) {
            (Some(remote), true) => Arc::clone(remote),
            _ => Arc::clone(&self.local),
        }
    }

    /// Remote first when the decision asks for it, then local once.
    async fn predict_with_fallback(
        &self,
        decision: &TierDecision,
        input: &[u8],
    ) -> Result<(Arc<dyn ModelRuntime>, Vec<u8>), String> {
        if decision.use_remote {
            if let Some(remote) = &self.remote {
                match self.predict_on(remote, decision, input).await {
                    Ok(output) => return Ok((Arc::clone(remote), output)),
                    Err(message) => {
                        log_warn!("remote prediction failed ({message}); retrying locally")
                    }
                }
            }
        }

        let output = self.predict_on(&self.local, decision, input).await?;
        Ok((Arc::clone(&self.local), output))
    }

    async fn predict_on(
        &self,
        runtime: &Arc<dyn ModelRuntime>,
        decision: &TierDecision,
        input: &[u8],
    ) -> Result<Vec<u8>, String> {
        let limit = self.config.initial_timeout();
        match timeout(limit, runtime.predict(decision, input)).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(err)) => Err(format!("{} runtime: {err:#}", runtime.name())),
            Err(_) => Err(format!("{} runtime timed out after {limit:?}", runtime.name())),
        }
    }

    /// Fan out `workers` refinements and wait for every one to report or
    /// time out.
    async fn refine_all(
        &self,
        runtime: Arc<dyn ModelRuntime>,
        decision: &TierDecision,
        initial: Arc<Vec<u8>>,
        workers: usize,
    ) -> Vec<WorkerResult> {
        let worker_timeout = self.config.worker_timeout();
        let decision = Arc::new(decision.clone());
        let mut pool = JoinSet::new();

        for worker in 0..workers {
            let runtime = Arc::clone(&runtime);
            let decision = Arc::clone(&decision);
            let initial = Arc::clone(&initial);
            pool.spawn(async move {
                let outcome =
                    match timeout(worker_timeout, runtime.refine(&decision, worker, &initial)).await {
                        Ok(Ok(output)) => Ok(output),
                        Ok(Err(err)) => Err(WorkerError::Failure {
                            worker,
                            message: format!("{err:#}"),
                        }),
                        Err(_) => Err(WorkerError::Timeout {
                            worker,
                            timeout: worker_timeout,
                        }),
                    };
                WorkerResult { worker, outcome }
            });
        }

        let mut results = Vec::with_capacity(workers);
        while let Some(joined) = pool.join_next().await {
            match joined {
                Ok(result) => {
                    if let Err(err) = &result.outcome {
                        log_warn!("{err}");
                    }
                    results.push(result);
                }
                Err(err) => log_error!("refinement worker task aborted: {err}"),
            }
        }
        results
    }

    fn result_ttl(&self, profile: &TaskProfile) -> Duration {
        profile
            .ttl_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.cache.default_ttl())
    }
}

fn cancelled(job: &mut RefinementJob) -> DispatchError {
    job.advance(JobState::Cancelled);
    DispatchError::Cancelled {
        job_id: job.job_id.clone(),
    }
}
