use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::job::{JobState, RefinementJob};
use crate::tiers::TierDecision;

/// Outcome summary of one dispatched job.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobReport {
    pub job_id: String,
    pub profile: String,
    pub key: String,
    pub state: JobState,
    pub tier_id: String,
    pub use_remote: bool,
    pub workers_requested: usize,
    pub workers_succeeded: usize,
    pub workers_timed_out: usize,
    pub workers_failed: usize,
    pub initial_reused: bool,
    pub total_ms: u64,
    pub finished_at: DateTime<Utc>,
}

impl JobReport {
    pub fn from_job(job: &RefinementJob, profile: &str, decision: &TierDecision, total_ms: u64) -> Self {
        Self {
            job_id: job.job_id.clone(),
            profile: profile.to_string(),
            key: job.key.to_string(),
            state: job.state(),
            tier_id: decision.tier_id.clone(),
            use_remote: decision.use_remote,
            workers_requested: job.workers_requested,
            workers_succeeded: job.successful_outputs().len(),
            workers_timed_out: job.timed_out(),
            workers_failed: job.failed(),
            initial_reused: job.initial_reused,
            total_ms,
            finished_at: Utc::now(),
        }
    }
}

/// Running totals plus a bounded history of recent jobs.
#[derive(Debug)]
pub struct DispatchStats {
    history: VecDeque<JobReport>,
    capacity: usize,
    done: u64,
    failed: u64,
    cancelled: u64,
    rejected: u64,
}

impl DispatchStats {
    pub fn new(capacity: usize) -> Self {
        Self {
            history: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
            done: 0,
            failed: 0,
            cancelled: 0,
            rejected: 0,
        }
    }

    pub fn record(&mut self, report: JobReport) {
        match report.state {
            JobState::Done => self.done += 1,
            JobState::Cancelled => self.cancelled += 1,
            _ => self.failed += 1,
        }
        if self.history.len() >= self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(report);
    }

    pub fn record_rejection(&mut self) {
        self.rejected += 1;
    }

    /// Newest last.
    pub fn recent(&self, limit: usize) -> Vec<JobReport> {
        let skip = self.history.len().saturating_sub(limit);
        self.history.iter().skip(skip).cloned().collect()
    }

    pub fn snapshot(&self) -> DispatchStatsSnapshot {
        let completed: Vec<&JobReport> = self
            .history
            .iter()
            .filter(|report| report.state == JobState::Done)
            .collect();

        let (average_total_ms, peak_total_ms) = if completed.is_empty() {
            (None, None)
        } else {
            let sum: u64 = completed.iter().map(|report| report.total_ms).sum();
            let peak = completed.iter().map(|report| report.total_ms).max();
            (Some(sum as f64 / completed.len() as f64), peak)
        };

        DispatchStatsSnapshot {
            jobs_done: self.done,
            jobs_failed: self.failed,
            jobs_cancelled: self.cancelled,
            jobs_rejected: self.rejected,
            average_total_ms,
            peak_total_ms,
            history_len: self.history.len(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DispatchStatsSnapshot {
    pub jobs_done: u64,
    pub jobs_failed: u64,
    pub jobs_cancelled: u64,
    pub jobs_rejected: u64,
    /// Over completed jobs still in the history window.
    pub average_total_ms: Option<f64>,
    pub peak_total_ms: Option<u64>,
    pub history_len: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(state: JobState, total_ms: u64) -> JobReport {
        JobReport {
            job_id: format!("job-{total_ms}"),
            profile: "p".into(),
            key: "p:k".into(),
            state,
            tier_id: "tiny".into(),
            use_remote: false,
            workers_requested: 1,
            workers_succeeded: 1,
            workers_timed_out: 0,
            workers_failed: 0,
            initial_reused: false,
            total_ms,
            finished_at: Utc::now(),
        }
    }

    #[test]
    fn history_is_bounded_and_totals_keep_counting() {
        let mut stats = DispatchStats::new(2);
        stats.record(report(JobState::Done, 10));
        stats.record(report(JobState::Failed, 20));
        stats.record(report(JobState::Done, 30));
        stats.record_rejection();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.jobs_done, 2);
        assert_eq!(snapshot.jobs_failed, 1);
        assert_eq!(snapshot.jobs_rejected, 1);
        assert_eq!(snapshot.history_len, 2);
        assert_eq!(snapshot.average_total_ms, Some(30.0));
        assert_eq!(snapshot.peak_total_ms, Some(30));

        let recent = stats.recent(1);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].total_ms, 30);
    }
}
