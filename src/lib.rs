//! Resource-aware task dispatch.
//!
//! A background monitor samples host load, a degradation controller turns
//! sustained pressure into throttling, pausing or offloading, and every
//! request runs on the richest model tier the host can currently afford.
//! Results are kept in a memory / SQLite / network cache hierarchy.

pub mod cache;
pub mod db;
pub mod degradation;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod models;
pub mod monitor;
pub mod settings;
pub mod tiers;
mod utils;

#[cfg(test)]
mod mock;

pub use cache::{CacheConfig, CacheKey, LoopbackNetworkCache, MultiTierCache, NetworkCache, TierKind};
pub use degradation::{DegradationConfig, DegradationMode, DegradationState, Transition};
pub use dispatch::{DispatchConfig, JobReport, JobState, ModelRuntime};
pub use engine::{Engine, HealthReport, Invalidation, ResultSource, SubmitOptions, SubmitOutcome};
pub use error::{DispatchError, SensorError, TierError, WorkerError};
pub use models::{CostClass, MergeRule, TaskProfile};
pub use monitor::{HostSensors, SensorSource, SystemSnapshot};
pub use settings::{EngineSettings, SettingsStore};
pub use tiers::{TierDecision, TierSelector};
pub use utils::init_logging;
