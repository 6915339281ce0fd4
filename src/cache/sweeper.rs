use std::{sync::Arc, time::Duration};

use anyhow::{bail, Context, Result};
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::MultiTierCache;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info};

/// Periodic TTL sweep, off the request path.
pub struct CacheSweeper {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl CacheSweeper {
    pub fn new() -> Self {
        Self {
            handle: None,
            cancel_token: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn start(&mut self, cache: Arc<MultiTierCache>, interval: Duration) -> Result<()> {
        if self.handle.is_some() {
            bail!("cache sweeper already running");
        }

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(sweep_loop(cache, interval, cancel_token.clone()));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("cache sweeper task failed to join")
                .map(|_| ())
        } else {
            Ok(())
        }
    }
}

impl Default for CacheSweeper {
    fn default() -> Self {
        Self::new()
    }
}

async fn sweep_loop(cache: Arc<MultiTierCache>, interval: Duration, cancel_token: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // first tick fires immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let removed = cache.sweep_expired().await;
                if removed > 0 {
                    log_info!("cache sweep removed {removed} expired entries");
                } else {
                    log_debug!("cache sweep found nothing to remove");
                }
            }
            _ = cancel_token.cancelled() => {
                log_info!("cache sweeper shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;

    #[tokio::test]
    async fn sweeper_removes_expired_entries_until_stopped() {
        let cache = Arc::new(MultiTierCache::open(&CacheConfig::default(), None).unwrap());
        cache.put("p:a", b"v".to_vec(), Duration::from_millis(20)).await;

        let mut sweeper = CacheSweeper::new();
        sweeper.start(Arc::clone(&cache), Duration::from_millis(50)).unwrap();
        assert!(sweeper.start(Arc::clone(&cache), Duration::from_millis(50)).is_err());

        tokio::time::sleep(Duration::from_millis(200)).await;
        sweeper.stop().await.unwrap();

        assert!(!sweeper.is_running());
        assert_eq!(cache.stats().await.expirations, 2);
    }
}
