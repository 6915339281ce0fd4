//! Backoff and degradation control.

mod config;
mod controller;
mod state;

pub use config::DegradationConfig;
pub use controller::{AdmissionGate, DegradationController};
pub use state::{DegradationMode, DegradationState, Transition};
