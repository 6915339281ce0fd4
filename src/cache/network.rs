use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::{
    sync::{mpsc, oneshot},
    time::{timeout, Instant},
};

use crate::error::CacheTierError;

use super::{entry::TierKind, stats::CacheStats};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

/// A value held by the shared network cache.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkRecord {
    pub value: Vec<u8>,
    /// When the service reports it; otherwise the local default TTL applies.
    pub expires_at: Option<DateTime<Utc>>,
}

/// External shared cache service. Owns its own TTL enforcement and wire
/// format; only keyed get/put/delete is required here.
#[async_trait]
pub trait NetworkCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<NetworkRecord>>;

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    async fn delete_prefix(&self, prefix: &str) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum DeleteTarget {
    Key(String),
    Prefix(String),
}

impl DeleteTarget {
    fn covers(&self, key: &str) -> bool {
        match self {
            DeleteTarget::Key(target) => target == key,
            DeleteTarget::Prefix(prefix) => key.starts_with(prefix.as_str()),
        }
    }
}

impl std::fmt::Display for DeleteTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeleteTarget::Key(key) => write!(f, "{key}"),
            DeleteTarget::Prefix(prefix) => write!(f, "{prefix}*"),
        }
    }
}

/// Deletes the service has not confirmed yet. Reads of a covered key are
/// misses so a stale remote value is never promoted into the local tiers.
///
/// A queued delete covers its keys until the writer applies it. A delete the
/// service rejected keeps covering them until a later delete of the same
/// target succeeds, or (for a single key) a fresh put of that key lands.
#[derive(Default)]
struct PendingDeletes {
    queued: HashMap<DeleteTarget, usize>,
    failed: HashSet<DeleteTarget>,
}

impl PendingDeletes {
    fn covers(&self, key: &str) -> bool {
        self.queued.keys().any(|target| target.covers(key))
            || self.failed.iter().any(|target| target.covers(key))
    }

    fn hold(&mut self, target: &DeleteTarget) {
        *self.queued.entry(target.clone()).or_insert(0) += 1;
    }

    fn release(&mut self, target: &DeleteTarget) {
        if let Some(count) = self.queued.get_mut(target) {
            *count -= 1;
            if *count == 0 {
                self.queued.remove(target);
            }
        }
    }

    fn applied(&mut self, target: &DeleteTarget, succeeded: bool) {
        self.release(target);
        if succeeded {
            self.failed.remove(target);
        } else {
            self.failed.insert(target.clone());
        }
    }

    fn rewritten(&mut self, key: &str) {
        self.failed.remove(&DeleteTarget::Key(key.to_string()));
    }
}

type SharedPending = Arc<Mutex<PendingDeletes>>;

fn pending(shared: &SharedPending) -> MutexGuard<'_, PendingDeletes> {
    match shared.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

enum NetworkOp {
    Put {
        key: String,
        value: Vec<u8>,
        ttl: Duration,
    },
    Delete {
        target: DeleteTarget,
        ack: oneshot::Sender<Result<()>>,
    },
    Flush {
        ack: oneshot::Sender<()>,
    },
}

/// Slowest tier. Reads go straight to the backend under a timeout; writes
/// and deletes are queued to a single writer task so operations on one key
/// reach the service in the order they were issued.
pub struct NetworkTier {
    backend: Arc<dyn NetworkCache>,
    queue: mpsc::Sender<NetworkOp>,
    timeout: Duration,
    stats: Arc<CacheStats>,
    pending: SharedPending,
}

impl NetworkTier {
    /// Must be called inside a Tokio runtime. The writer task exits once the
    /// tier is dropped and its queue drains.
    pub fn spawn(
        backend: Arc<dyn NetworkCache>,
        op_timeout: Duration,
        queue_capacity: usize,
        stats: Arc<CacheStats>,
    ) -> Self {
        let (queue, receiver) = mpsc::channel(queue_capacity.max(1));
        let pending = SharedPending::default();
        tokio::spawn(run_writer(
            Arc::clone(&backend),
            receiver,
            op_timeout,
            Arc::clone(&stats),
            Arc::clone(&pending),
        ));

        Self {
            backend,
            queue,
            timeout: op_timeout,
            stats,
            pending,
        }
    }

    /// True while a delete covering `key` is unconfirmed.
    pub fn is_delete_pending(&self, key: &str) -> bool {
        pending(&self.pending).covers(key)
    }

    pub async fn get(&self, key: &str) -> Result<Option<NetworkRecord>, CacheTierError> {
        if self.is_delete_pending(key) {
            log_debug!("network read of {key} skipped: delete not yet confirmed");
            return Ok(None);
        }

        match timeout(self.timeout, self.backend.get(key)).await {
            // the delete may have been queued while the read was in flight
            Ok(Ok(Some(_))) if self.is_delete_pending(key) => Ok(None),
            Ok(Ok(record)) => Ok(record),
            Ok(Err(err)) => Err(CacheTierError::new(TierKind::Network, format!("{err:#}"))),
            Err(_) => Err(CacheTierError::new(
                TierKind::Network,
                format!("get timed out after {:?}", self.timeout),
            )),
        }
    }

    /// Fire and forget. A full queue drops the write.
    pub fn enqueue_put(&self, key: &str, value: Vec<u8>, ttl: Duration) {
        let op = NetworkOp::Put {
            key: key.to_string(),
            value,
            ttl,
        };
        if let Err(err) = self.queue.try_send(op) {
            self.stats.record_failure(TierKind::Network);
            log_warn!("network cache write for {key} dropped: {err}");
        }
    }

    pub async fn delete(&self, key: &str) -> Result<(), CacheTierError> {
        self.acknowledged(DeleteTarget::Key(key.to_string())).await
    }

    pub async fn delete_prefix(&self, prefix: &str) -> Result<(), CacheTierError> {
        self.acknowledged(DeleteTarget::Prefix(prefix.to_string()))
            .await
    }

    /// Queue a delete and wait for the writer's ack, both within the tier
    /// timeout. The target stays covered until the writer has applied it,
    /// even when this call gives up first.
    async fn acknowledged(&self, target: DeleteTarget) -> Result<(), CacheTierError> {
        let started = Instant::now();
        let (ack, done) = oneshot::channel();
        pending(&self.pending).hold(&target);

        let op = NetworkOp::Delete {
            target: target.clone(),
            ack,
        };
        let queued = match timeout(self.timeout, self.queue.send(op)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(anyhow!("network writer stopped")),
            Err(_) => Err(anyhow!("delete not queued within {:?}", self.timeout)),
        };
        if let Err(err) = queued {
            // never reached the writer, so nothing will release the hold
            pending(&self.pending).applied(&target, false);
            return Err(CacheTierError::new(TierKind::Network, format!("{err:#}")));
        }

        let remaining = self.timeout.saturating_sub(started.elapsed());
        match timeout(remaining, done).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(err))) => Err(CacheTierError::new(TierKind::Network, format!("{err:#}"))),
            Ok(Err(_)) => Err(CacheTierError::new(
                TierKind::Network,
                "network writer dropped the request",
            )),
            Err(_) => Err(CacheTierError::new(
                TierKind::Network,
                format!("delete of {target} not acknowledged within {:?}", self.timeout),
            )),
        }
    }

    /// Wait until every operation queued so far has been attempted.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.queue.send(NetworkOp::Flush { ack }).await.is_ok() {
            let _ = done.await;
        }
    }
}

async fn run_writer(
    backend: Arc<dyn NetworkCache>,
    mut receiver: mpsc::Receiver<NetworkOp>,
    op_timeout: Duration,
    stats: Arc<CacheStats>,
    pending_deletes: SharedPending,
) {
    while let Some(op) = receiver.recv().await {
        match op {
            NetworkOp::Put { key, value, ttl } => {
                match bounded(op_timeout, backend.put(&key, value, ttl)).await {
                    Ok(()) => pending(&pending_deletes).rewritten(&key),
                    Err(err) => {
                        stats.record_failure(TierKind::Network);
                        log_warn!("network cache write for {key} failed: {err:#}");
                    }
                }
            }
            NetworkOp::Delete { target, ack } => {
                let result = match &target {
                    DeleteTarget::Key(key) => bounded(op_timeout, backend.delete(key)).await,
                    DeleteTarget::Prefix(prefix) => {
                        bounded(op_timeout, backend.delete_prefix(prefix)).await
                    }
                };
                pending(&pending_deletes).applied(&target, result.is_ok());
                if let Err(err) = &result {
                    log_warn!("network delete of {target} failed: {err:#}; reads stay local");
                }
                let _ = ack.send(result);
            }
            NetworkOp::Flush { ack } => {
                let _ = ack.send(());
            }
        }
    }
    log_debug!("network cache writer stopped");
}

async fn bounded<F>(op_timeout: Duration, call: F) -> Result<()>
where
    F: std::future::Future<Output = Result<()>>,
{
    timeout(op_timeout, call)
        .await
        .map_err(|_| anyhow!("timed out after {op_timeout:?}"))?
}

/// In-process [`NetworkCache`] with its own TTL enforcement. Useful for
/// single-node deployments and for exercising the tier.
#[derive(Default)]
pub struct LoopbackNetworkCache {
    records: Mutex<HashMap<String, NetworkRecord>>,
}

impl LoopbackNetworkCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> MutexGuard<'_, HashMap<String, NetworkRecord>> {
        match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.records().contains_key(key)
    }
}

#[async_trait]
impl NetworkCache for LoopbackNetworkCache {
    async fn get(&self, key: &str) -> Result<Option<NetworkRecord>> {
        let mut records = self.records();
        let expired = match records.get(key) {
            Some(record) => record.expires_at.map_or(false, |at| at <= Utc::now()),
            None => return Ok(None),
        };
        if expired {
            records.remove(key);
            return Ok(None);
        }
        Ok(records.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_add_signed(ttl));
        self.records()
            .insert(key.to_string(), NetworkRecord { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.records().remove(key);
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<()> {
        self.records().retain(|key, _| !key.starts_with(prefix));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{FlakyNetworkCache, SlowDeleteNetworkCache};

    fn tier(backend: Arc<dyn NetworkCache>) -> (NetworkTier, Arc<CacheStats>) {
        let stats = Arc::new(CacheStats::default());
        let tier = NetworkTier::spawn(backend, Duration::from_millis(100), 16, Arc::clone(&stats));
        (tier, stats)
    }

    #[tokio::test]
    async fn queued_operations_apply_in_order() {
        let backend = Arc::new(LoopbackNetworkCache::new());
        let (tier, _) = tier(backend.clone());

        tier.enqueue_put("k", b"one".to_vec(), Duration::from_secs(60));
        tier.delete("k").await.unwrap();
        tier.enqueue_put("k", b"two".to_vec(), Duration::from_secs(60));
        tier.flush().await;

        let record = tier.get("k").await.unwrap().unwrap();
        assert_eq!(record.value, b"two".to_vec());
    }

    #[tokio::test]
    async fn reads_skip_keys_with_a_delete_in_flight() {
        let backend = Arc::new(SlowDeleteNetworkCache::new(Duration::from_millis(40)));
        backend.put("k", b"old".to_vec(), Duration::from_secs(60)).await.unwrap();
        let (tier, _) = tier(backend.clone());

        let (deleted, during) = tokio::join!(tier.delete("k"), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            tier.get("k").await
        });
        assert!(deleted.is_ok());
        assert!(during.unwrap().is_none());
        assert!(!tier.is_delete_pending("k"));

        tier.enqueue_put("k", b"new".to_vec(), Duration::from_secs(60));
        tier.flush().await;
        assert_eq!(tier.get("k").await.unwrap().unwrap().value, b"new".to_vec());
    }

    #[tokio::test]
    async fn slow_backend_reads_time_out_as_tier_errors() {
        let backend = Arc::new(FlakyNetworkCache::slow(Duration::from_millis(500)));
        let (tier, _) = tier(backend);

        let err = tier.get("k").await.unwrap_err();
        assert_eq!(err.tier, TierKind::Network);
    }

    #[tokio::test]
    async fn failed_writes_are_counted_not_raised() {
        let backend = Arc::new(FlakyNetworkCache::failing());
        let (tier, stats) = tier(backend);

        tier.enqueue_put("k", b"v".to_vec(), Duration::from_secs(60));
        tier.flush().await;

        let snapshot = stats.snapshot((0, 0), None);
        assert_eq!(snapshot.network.failures, 1);
    }

    #[tokio::test]
    async fn loopback_enforces_ttl_and_prefix_delete() {
        let cache = LoopbackNetworkCache::new();
        cache.put("a:1", b"x".to_vec(), Duration::ZERO).await.unwrap();
        cache.put("a:2", b"y".to_vec(), Duration::from_secs(60)).await.unwrap();
        cache.put("b:1", b"z".to_vec(), Duration::from_secs(60)).await.unwrap();

        assert!(cache.get("a:1").await.unwrap().is_none());
        cache.delete_prefix("a:").await.unwrap();
        assert!(!cache.contains("a:2"));
        assert_eq!(cache.len(), 1);
    }
}
