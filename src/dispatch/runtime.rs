use anyhow::Result;
use async_trait::async_trait;

use crate::tiers::TierDecision;

/// Executes model work for the dispatcher.
///
/// The local runtime is always present; a remote one is optional and only
/// used while the engine is offloading. Implementations must be safe to call
/// from several refinement workers at once.
#[async_trait]
pub trait ModelRuntime: Send + Sync {
    fn name(&self) -> &str;

    /// The single initial-prediction step.
    async fn predict(&self, decision: &TierDecision, input: &[u8]) -> Result<Vec<u8>>;

    /// One independent refinement of the initial output.
    async fn refine(
        &self,
        decision: &TierDecision,
        worker_index: usize,
        initial: &[u8],
    ) -> Result<Vec<u8>>;

    /// Cheap reachability check.
    async fn is_available(&self) -> bool {
        true
    }
}
