//! Error taxonomy.
//!
//! Only [`DispatchError`] ever reaches a caller of `Engine::submit`. The other
//! types describe failures that are absorbed where they happen (a missing
//! sensor, a slow cache tier, one refinement worker timing out) and exist so
//! those paths can be logged and tested precisely.

use std::time::Duration;

use thiserror::Error;

use crate::cache::TierKind;

/// A host sensor could not be read. The snapshot field becomes `None`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SensorError {
    #[error("{sensor} sensor unavailable")]
    Unavailable { sensor: &'static str },
}

/// The remote execution tier could not be used for this decision.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TierError {
    #[error("remote tier unreachable: {reason}")]
    Unreachable { reason: String },
}

/// One cache tier failed an operation. Treated as a miss for that tier.
#[derive(Debug, Clone, Error)]
#[error("{tier} cache tier failure: {message}")]
pub struct CacheTierError {
    pub tier: TierKind,
    pub message: String,
}

impl CacheTierError {
    pub fn new(tier: TierKind, message: impl Into<String>) -> Self {
        Self {
            tier,
            message: message.into(),
        }
    }
}

/// A single refinement worker did not produce output.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WorkerError {
    #[error("refinement worker {worker} timed out after {timeout:?}")]
    Timeout { worker: usize, timeout: Duration },
    #[error("refinement worker {worker} failed: {message}")]
    Failure { worker: usize, message: String },
}

/// Failures surfaced to the caller of `submit`.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The engine is paused and the request cannot wait out the backoff.
    #[error("rejected under resource pressure: engine paused, retry after {backoff:?}")]
    DegradedRejection { backoff: Duration },

    /// Every refinement worker timed out or failed.
    #[error("refinement exhausted: 0 of {attempted} workers succeeded ({timed_out} timed out, {failed} failed)")]
    RefinementExhausted {
        attempted: usize,
        timed_out: usize,
        failed: usize,
    },

    #[error("initial prediction failed: {0}")]
    PredictionFailed(String),

    #[error("job {job_id} cancelled")]
    Cancelled { job_id: String },

    #[error("job {job_id} exceeded its deadline of {deadline:?}")]
    JobTimeout { job_id: String, deadline: Duration },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl DispatchError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DispatchError::Cancelled { .. })
    }
}
