use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::{cache::CacheKey, error::WorkerError};

const ENABLE_LOGS: bool = true;

use crate::log_error;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum JobState {
    Created,
    InitialPredicted,
    Refining,
    Merging,
    Done,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Created => "created",
            JobState::InitialPredicted => "initial_predicted",
            JobState::Refining => "refining",
            JobState::Merging => "merging",
            JobState::Done => "done",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Failed | JobState::Cancelled)
    }

    /// Forward edges of the job lifecycle. `Failed` is reachable from
    /// `Created` (prediction failure) and from any later live state when the
    /// job deadline passes; `Cancelled` from any live state.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (Created, InitialPredicted) => true,
            (InitialPredicted, Refining) => true,
            (Refining, Merging) => true,
            (Merging, Done) => true,
            (state, Failed) | (state, Cancelled) => !state.is_terminal(),
            _ => false,
        }
    }
}

/// Result of one refinement worker.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerResult {
    pub worker: usize,
    pub outcome: Result<Vec<u8>, WorkerError>,
}

/// One dispatch, from initial prediction to merged result. Owned by the
/// dispatcher for the duration of the request and then discarded.
#[derive(Debug)]
pub struct RefinementJob {
    pub job_id: String,
    pub key: CacheKey,
    pub input: Arc<Vec<u8>>,
    pub initial_output: Option<Arc<Vec<u8>>>,
    pub initial_reused: bool,
    pub refinement_results: Vec<WorkerResult>,
    pub workers_requested: usize,
    pub created_at: DateTime<Utc>,
    state: JobState,
    refinement_finished: bool,
}

impl RefinementJob {
    pub fn new(key: CacheKey, input: Vec<u8>, workers_requested: usize) -> Self {
        Self {
            job_id: Uuid::new_v4().to_string(),
            key,
            input: Arc::new(input),
            initial_output: None,
            initial_reused: false,
            refinement_results: Vec::new(),
            workers_requested: workers_requested.max(1),
            created_at: Utc::now(),
            state: JobState::Created,
            refinement_finished: false,
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Move to `next`. Illegal moves are refused and logged.
    pub fn advance(&mut self, next: JobState) -> bool {
        if self.state.can_transition_to(next) {
            self.state = next;
            true
        } else {
            log_error!(
                "job {} refused transition {} -> {}",
                self.job_id,
                self.state.as_str(),
                next.as_str()
            );
            false
        }
    }

    pub fn record_initial(&mut self, output: Vec<u8>, reused: bool) {
        self.initial_output = Some(Arc::new(output));
        self.initial_reused = reused;
        self.advance(JobState::InitialPredicted);
    }

    /// Successful outputs, in worker-index order.
    pub fn successful_outputs(&self) -> Vec<(usize, Vec<u8>)> {
        self.refinement_results
            .iter()
            .filter_map(|result| match &result.outcome {
                Ok(output) => Some((result.worker, output.clone())),
                Err(_) => None,
            })
            .collect()
    }

    pub fn timed_out(&self) -> usize {
        self.refinement_results
            .iter()
            .filter(|result| matches!(result.outcome, Err(WorkerError::Timeout { .. })))
            .count()
    }

    /// Store worker results once every worker has reported or been lost.
    pub fn finish_refinement(&mut self, mut results: Vec<WorkerResult>) {
        results.sort_by_key(|result| result.worker);
        self.refinement_results = results;
        self.refinement_finished = true;
    }

    /// Workers that errored or never reported.
    pub fn failed(&self) -> usize {
        let reported = self
            .refinement_results
            .iter()
            .filter(|result| matches!(result.outcome, Err(WorkerError::Failure { .. })))
            .count();
        if self.refinement_finished {
            reported + self.workers_requested.saturating_sub(self.refinement_results.len())
        } else {
            reported
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn job() -> RefinementJob {
        RefinementJob::new(CacheKey::for_input("p", b"in"), b"in".to_vec(), 3)
    }

    #[test]
    fn happy_path_transitions() {
        let mut job = job();
        assert_eq!(job.state(), JobState::Created);
        job.record_initial(b"draft".to_vec(), false);
        assert!(job.advance(JobState::Refining));
        assert!(job.advance(JobState::Merging));
        assert!(job.advance(JobState::Done));
        assert!(job.state().is_terminal());
    }

    #[test]
    fn terminal_states_are_final() {
        let mut job = job();
        assert!(job.advance(JobState::Failed));
        assert!(!job.advance(JobState::Cancelled));
        assert!(!job.advance(JobState::InitialPredicted));
        assert_eq!(job.state(), JobState::Failed);
    }

    #[test]
    fn phases_cannot_be_skipped() {
        let mut job = job();
        assert!(!job.advance(JobState::Refining));
        assert!(!job.advance(JobState::Done));
        assert_eq!(job.state(), JobState::Created);
    }

    #[test]
    fn worker_tallies() {
        let mut job = job();
        job.record_initial(b"draft".to_vec(), false);
        job.advance(JobState::Refining);
        job.finish_refinement(vec![
            WorkerResult {
                worker: 0,
                outcome: Ok(b"a".to_vec()),
            },
            WorkerResult {
                worker: 1,
                outcome: Err(WorkerError::Timeout {
                    worker: 1,
                    timeout: Duration::from_millis(5),
                }),
            },
        ]);

        assert_eq!(job.successful_outputs(), vec![(0, b"a".to_vec())]);
        assert_eq!(job.timed_out(), 1);
        // worker 2 never reported
        assert_eq!(job.failed(), 1);
    }
}
