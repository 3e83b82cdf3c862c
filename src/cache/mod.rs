//! Two-tier read-through/write-through cache.
//!
//! Local (in-process LRU) and distributed (opaque KV, epoch-stamped for
//! pattern invalidation) tiers, wired together the way
//! `thichuong-multi-tier-cache`'s `CacheManager` wires its L1/L2 — get
//! tries local first, promotes distributed hits back into local, and
//! every operation is counted into `CacheMetrics`.

pub mod distributed;
pub mod key;
pub mod metrics;
pub mod local;

pub use distributed::{DistributedCache, InMemoryDistributedCache, RedisDistributedCache};
pub use local::{CacheEntry, LocalCache};
pub use metrics::{CacheMetrics, CacheMetricsSnapshot};

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Where a `get` was satisfied from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheOrigin {
    Local,
    Distributed,
}

pub struct CacheGetResult {
    pub value: Vec<u8>,
    pub origin: CacheOrigin,
}

/// TTL policy per namespace, expressed as minutes for readability.
pub mod ttl {
    use std::time::Duration;

    pub const SEARCH_EMPTY_QUERY: Duration = Duration::from_secs(10 * 60);
    pub const SEARCH_WITH_QUERY: Duration = Duration::from_secs(5 * 60);
    pub const SEARCH_FILTER_ONLY: Duration = Duration::from_secs(3 * 60);
    pub const SUGGESTIONS: Duration = Duration::from_secs(2 * 60);
    pub const CRYPTO_BY_ID: Duration = Duration::from_secs(5 * 60);
    pub const FILTERS: Duration = Duration::from_secs(10 * 60);

    pub fn trending(period: &str) -> Duration {
        match period {
            "1h" => Duration::from_secs(2 * 60),
            "7d" => Duration::from_secs(30 * 60),
            "30d" => Duration::from_secs(60 * 60),
            _ => Duration::from_secs(10 * 60), // 24h and anything unrecognised
        }
    }

    /// Picks the TTL for a search request: empty query is the most
    /// stable, a text query drifts faster, filter-only (no query, but
    /// at least one filter) is the most volatile.
    pub fn for_search(query: &str, has_filters: bool) -> Duration {
        if !query.trim().is_empty() {
            SEARCH_WITH_QUERY
        } else if has_filters {
            SEARCH_FILTER_ONLY
        } else {
            SEARCH_EMPTY_QUERY
        }
    }
}

pub struct CacheManager {
    local: LocalCache,
    distributed: Arc<dyn DistributedCache>,
    metrics: CacheMetrics,
}

impl CacheManager {
    pub fn new(
        max_local_items: usize,
        items_to_prune: usize,
        distributed: Arc<dyn DistributedCache>,
    ) -> Self {
        Self {
            local: LocalCache::new(max_local_items, items_to_prune),
            distributed,
            metrics: CacheMetrics::default(),
        }
    }

    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }

    /// Resolves the actual distributed-tier key for a logical cache key:
    /// looks up the current epoch for the key's namespace and stamps it
    /// in, so a key written before the namespace's epoch was last bumped
    /// never matches the key a post-bump `get`/`set` computes. A failed
    /// epoch lookup degrades to epoch 0 — the same "distributed errors
    /// never fail the call" policy as every other distributed op.
    async fn distributed_key(&self, key: &str) -> String {
        let namespace = key::namespace_of(key);
        let epoch = match self.distributed.epoch(&namespace).await {
            Ok(epoch) => epoch,
            Err(err) => {
                warn!(%key, %namespace, error = %err, "failed to read distributed epoch, defaulting to 0");
                self.metrics.record_error();
                0
            }
        };
        key::distributed_key(key, &namespace, epoch)
    }

    /// Local-hit short-circuits; local-miss tries distributed; a
    /// distributed hit is copied back into local with `local_ttl`
    /// before being returned.
    pub async fn get(&self, key: &str, local_ttl: Duration) -> Option<CacheGetResult> {
        self.metrics.record_op();

        if let Some(value) = self.local.get(key) {
            self.metrics.record_local_hit();
            return Some(CacheGetResult {
                value,
                origin: CacheOrigin::Local,
            });
        }
        self.metrics.record_local_miss();

        let distributed_key = self.distributed_key(key).await;
        match self.distributed.get(&distributed_key).await {
            Ok(Some(value)) => {
                self.metrics.record_dist_hit();
                self.local.set(key, value.clone(), local_ttl);
                Some(CacheGetResult {
                    value,
                    origin: CacheOrigin::Distributed,
                })
            }
            Ok(None) => {
                self.metrics.record_dist_miss();
                None
            }
            Err(err) => {
                warn!(%key, error = %err, "distributed cache get failed, treating as miss");
                self.metrics.record_error();
                None
            }
        }
    }

    /// `set(key, value, ttl)`: writes local synchronously; the
    /// distributed write is best-effort — a failure is logged and
    /// counted but does not fail the call.
    pub async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) {
        self.local.set(key, value.clone(), ttl);
        let distributed_key = self.distributed_key(key).await;
        if let Err(err) = self.distributed.set(&distributed_key, value, ttl).await {
            warn!(%key, error = %err, "distributed cache set failed, local tier still serves reads");
            self.metrics.record_error();
        }
    }

    /// Spawns `set` as a detached, timeout-bounded task so a slow
    /// distributed write never blocks the caller's response.
    pub fn set_fire_and_forget(self: &Arc<Self>, key: String, value: Vec<u8>, ttl: Duration) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let fut = this.set(&key, value, ttl);
            if tokio::time::timeout(Duration::from_secs(5), fut).await.is_err() {
                warn!(%key, "fire-and-forget cache populate timed out after 5s");
            }
        });
    }

    pub async fn delete(&self, key: &str) {
        self.local.delete(key);
        let distributed_key = self.distributed_key(key).await;
        if let Err(err) = self.distributed.delete(&distributed_key).await {
            warn!(%key, error = %err, "distributed cache delete failed");
            self.metrics.record_error();
        }
    }

    /// Prefix-deletes from local (exact); bumps the distributed epoch
    /// for the namespace so all previously-written keys under it become
    /// unreachable — the next `get`/`set` for that namespace computes a
    /// key stamped with the new epoch, which no pre-invalidation key can
    /// match, and the stale entries simply expire under their own TTL.
    pub async fn invalidate_pattern(&self, prefix: &str) {
        self.local.invalidate_prefix(prefix);
        let namespace = key::namespace_of(prefix);
        if let Err(err) = self.distributed.bump_epoch(&namespace).await {
            warn!(%namespace, error = %err, "failed to bump distributed epoch");
            self.metrics.record_error();
        }
    }

    pub async fn clear(&self) {
        self.local.clear();
        if let Err(err) = self.distributed.flush_all().await {
            warn!(error = %err, "distributed cache flush failed");
            self.metrics.record_error();
        }
    }

    /// Pre-populates using the distributed TTL; cooperatively cancellable
    /// via `cancel` (checked between entries).
    pub async fn warm(
        &self,
        entries: impl IntoIterator<Item = (String, Vec<u8>)>,
        ttl: Duration,
        cancel: &tokio_util::sync::CancellationToken,
    ) {
        let mut warmed = 0usize;
        for (key, value) in entries {
            if cancel.is_cancelled() {
                debug!(warmed, "cache warm cancelled");
                return;
            }
            self.local.set(&key, value.clone(), ttl);
            let distributed_key = self.distributed_key(&key).await;
            if let Err(err) = self.distributed.set(&distributed_key, value, ttl).await {
                warn!(%key, error = %err, "cache warm: distributed set failed");
            }
            warmed += 1;
        }
        debug!(warmed, "cache warm complete");
    }

    /// Round-trips a test key through both tiers; fails if either cannot
    /// echo it back.
    pub async fn ping(&self) -> anyhow::Result<()> {
        const PING_KEY: &str = "search-api:__ping";
        self.local.set(PING_KEY, b"pong".to_vec(), Duration::from_secs(5));
        anyhow::ensure!(self.local.get(PING_KEY).is_some(), "local cache ping failed");
        self.distributed.ping().await
    }

    /// Releases the local tier and drops the distributed handle. Called
    /// last in the shutdown sequence, after trending and the consumer
    /// have already stopped, so no in-flight request is still populating
    /// the cache when it goes.
    pub async fn close(&self) {
        self.local.clear();
        debug!("cache tier closed");
    }

    pub async fn stats(&self) -> CacheStats {
        let distributed_connected = self.distributed.ping().await.is_ok();
        CacheStats {
            metrics: self.metrics.snapshot(),
            local_size: self.local.len(),
            local_max_size: self.local.max_items(),
            distributed_connected,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStats {
    #[serde(flatten)]
    pub metrics: CacheMetricsSnapshot,
    pub local_size: usize,
    pub local_max_size: usize,
    pub distributed_connected: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> CacheManager {
        CacheManager::new(1000, 100, Arc::new(InMemoryDistributedCache::new()))
    }

    #[tokio::test]
    async fn set_then_get_hits_local() {
        let cache = manager();
        cache.set("k", b"v".to_vec(), Duration::from_secs(60)).await;
        let result = cache.get("k", Duration::from_secs(60)).await.unwrap();
        assert_eq!(result.value, b"v");
        assert_eq!(result.origin, CacheOrigin::Local);
    }

    #[tokio::test]
    async fn distributed_hit_is_promoted_to_local() {
        let distributed = Arc::new(InMemoryDistributedCache::new());
        let cache = CacheManager::new(1000, 100, distributed.clone());
        let epoch_stamped_key = cache.distributed_key("k").await;
        distributed.set(&epoch_stamped_key, b"v".to_vec(), Duration::from_secs(60)).await.unwrap();

        let result = cache.get("k", Duration::from_secs(60)).await.unwrap();
        assert_eq!(result.origin, CacheOrigin::Distributed);

        // Second read should now be a local hit without touching the
        // distributed tier again.
        distributed.fail_next_ops(100);
        let result = cache.get("k", Duration::from_secs(60)).await.unwrap();
        assert_eq!(result.origin, CacheOrigin::Local);
    }

    #[tokio::test]
    async fn distributed_set_failure_does_not_fail_the_call() {
        let distributed = Arc::new(InMemoryDistributedCache::new());
        distributed.fail_next_ops(1);
        let cache = CacheManager::new(1000, 100, distributed);
        // Should not panic or propagate an error.
        cache.set("k", b"v".to_vec(), Duration::from_secs(60)).await;
        assert!(cache.get("k", Duration::from_secs(60)).await.is_some());
    }

    #[tokio::test]
    async fn pattern_invalidation_bumps_epoch_and_clears_local_prefix() {
        let distributed = Arc::new(InMemoryDistributedCache::new());
        let cache = CacheManager::new(1000, 100, distributed.clone());
        cache.set("search:a", b"1".to_vec(), Duration::from_secs(60)).await;
        cache.set("crypto:b", b"2".to_vec(), Duration::from_secs(60)).await;

        cache.invalidate_pattern("search:").await;

        assert!(cache.get("search:a", Duration::from_secs(60)).await.is_none());
        assert!(cache.get("crypto:b", Duration::from_secs(60)).await.is_some());
        assert_eq!(distributed.epoch("search").await.unwrap(), 1);
    }

    /// Regression test for the pattern-invalidation contract (spec
    /// §4.1/§9): a value written to the distributed tier before an
    /// invalidation must be unreachable afterwards even though its
    /// logical key and TTL are unchanged — the epoch bump has to be
    /// threaded into the actual key every `get`/`set` computes, not just
    /// recorded in a separate counter no read path consults.
    #[tokio::test]
    async fn invalidated_namespace_makes_a_still_unexpired_distributed_value_unreachable() {
        let distributed = Arc::new(InMemoryDistributedCache::new());
        let cache = CacheManager::new(1000, 100, distributed.clone());

        // Write directly into the distributed tier at the pre-invalidation
        // epoch, bypassing the local tier entirely so a subsequent get()
        // can only be served (or not) by the distributed tier.
        let pre_invalidation_key = cache.distributed_key("crypto:BTC").await;
        distributed
            .set(&pre_invalidation_key, b"stale".to_vec(), Duration::from_secs(3600))
            .await
            .unwrap();
        assert!(cache.get("crypto:BTC", Duration::from_secs(60)).await.is_some());

        cache.invalidate_pattern("crypto:").await;

        // Same logical key, long TTL still unexpired, but the namespace's
        // epoch moved on: the key computed for this read no longer points
        // at the stale entry.
        assert!(cache.get("crypto:BTC", Duration::from_secs(60)).await.is_none());
    }
}
