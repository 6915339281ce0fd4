//! Compute tier selection.

mod config;
mod selector;

pub use config::{TierConfig, TierSpec};
pub use selector::{TierDecision, TierSelector};
