use std::sync::Arc;

use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::EngineCore;

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

/// Poll the host and feed the degradation controller until cancelled.
pub async fn monitor_loop(core: Arc<EngineCore>, interval: Duration, cancel_token: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if tokio::time::timeout(interval, core.tick()).await.is_err() {
                    log_warn!("monitor tick took longer than the {}ms poll interval", interval.as_millis());
                }
            }
            _ = cancel_token.cancelled() => {
                log_info!("monitor loop shutting down");
                break;
            }
        }
    }
}
