//! Parallel refinement dispatch.

mod config;
mod controller;
mod job;
mod merge;
mod runtime;
mod stats;

pub use config::DispatchConfig;
pub use controller::{DispatchOutput, Dispatcher};
pub use job::{JobState, RefinementJob, WorkerResult};
pub use merge::merge_outputs;
pub use runtime::ModelRuntime;
pub use stats::{DispatchStats, DispatchStatsSnapshot, JobReport};
