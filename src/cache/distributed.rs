//! Distributed (opaque key-value) tier.
//!
//! Values are wrapped in a self-describing JSON envelope on the wire
//! (`{key, value, ttl, created_at}`) so any binary-safe KV store works
//! behind `DistributedCache`. The default backend is Redis (`redis`
//! crate, `tokio-comp` + `connection-manager` features — the same
//! feature set the pack's `thichuong-multi-tier-cache` and
//! `leeleeEcho-polymarket-backend` select).
//!
//! Pattern invalidation has no native support on this tier, so it is
//! implemented via epoch stamping: every distributed key embeds the
//! current epoch for its namespace, and `bump_epoch` makes all
//! previously-written keys unreachable. They still expire under their
//! own TTL rather than being actively deleted.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributedEnvelope {
    pub key: String,
    pub value: Vec<u8>,
    pub ttl_secs: u64,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait DistributedCache: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> anyhow::Result<()>;
    async fn delete(&self, key: &str) -> anyhow::Result<()>;
    async fn flush_all(&self) -> anyhow::Result<()>;
    async fn ping(&self) -> anyhow::Result<()>;
    /// Current epoch for a namespace; keys are stamped `{namespace}:{epoch}:{rest}`.
    async fn epoch(&self, namespace: &str) -> anyhow::Result<u64>;
    /// Bumps the epoch, logically invalidating every key under the old one.
    async fn bump_epoch(&self, namespace: &str) -> anyhow::Result<u64>;
}

/// Redis-backed implementation.
pub struct RedisDistributedCache {
    manager: redis::aio::ConnectionManager,
}

impl RedisDistributedCache {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url)?;
        let manager = redis::aio::ConnectionManager::new(client).await?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl DistributedCache for RedisDistributedCache {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        use redis::AsyncCommands;
        let mut conn = self.manager.clone();
        let raw: Option<Vec<u8>> = conn.get(key).await?;
        let Some(bytes) = raw else {
            return Ok(None);
        };
        let envelope: DistributedEnvelope = serde_json::from_slice(&bytes)?;
        Ok(Some(envelope.value))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> anyhow::Result<()> {
        use redis::AsyncCommands;
        let mut conn = self.manager.clone();
        let envelope = DistributedEnvelope {
            key: key.to_string(),
            value,
            ttl_secs: ttl.as_secs(),
            created_at: Utc::now(),
        };
        let bytes = serde_json::to_vec(&envelope)?;
        let ttl_secs = ttl.as_secs().max(1);
        let _: () = conn.set_ex(key, bytes, ttl_secs).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        use redis::AsyncCommands;
        let mut conn = self.manager.clone();
        // A missing key is not an error.
        let _: i64 = conn.del(key).await.unwrap_or(0);
        Ok(())
    }

    async fn flush_all(&self) -> anyhow::Result<()> {
        let mut conn = self.manager.clone();
        redis::cmd("FLUSHDB").query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn ping(&self) -> anyhow::Result<()> {
        let mut conn = self.manager.clone();
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        anyhow::ensure!(pong == "PONG", "unexpected PING reply: {pong}");
        Ok(())
    }

    async fn epoch(&self, namespace: &str) -> anyhow::Result<u64> {
        use redis::AsyncCommands;
        let mut conn = self.manager.clone();
        let key = format!("{namespace}:__epoch");
        let value: Option<u64> = conn.get(&key).await?;
        Ok(value.unwrap_or(0))
    }

    async fn bump_epoch(&self, namespace: &str) -> anyhow::Result<u64> {
        use redis::AsyncCommands;
        let mut conn = self.manager.clone();
        let key = format!("{namespace}:__epoch");
        let next: u64 = conn.incr(&key, 1).await?;
        Ok(next)
    }
}

/// In-memory fake used by coordinator/cache unit tests and by deployments
/// without a Redis instance available (degrades the distributed tier to
/// an in-process stand-in; still exercises the same contract).
#[derive(Default)]
pub struct InMemoryDistributedCache {
    store: Mutex<HashMap<String, (Vec<u8>, std::time::Instant, Duration)>>,
    epochs: Mutex<HashMap<String, u64>>,
    fail_next: Arc<AtomicU64>,
}

impl InMemoryDistributedCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forces the next `n` operations to fail, for exercising the
    /// "distributed failure degrades gracefully" path in tests.
    pub fn fail_next_ops(&self, n: u64) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    fn maybe_fail(&self) -> anyhow::Result<()> {
        let remaining = self.fail_next.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next.fetch_sub(1, Ordering::SeqCst);
            anyhow::bail!("simulated distributed cache failure");
        }
        Ok(())
    }
}

#[async_trait]
impl DistributedCache for InMemoryDistributedCache {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        self.maybe_fail()?;
        let store = self.store.lock().await;
        Ok(store.get(key).and_then(|(value, written_at, ttl)| {
            if written_at.elapsed() > *ttl {
                None
            } else {
                Some(value.clone())
            }
        }))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> anyhow::Result<()> {
        self.maybe_fail()?;
        let mut store = self.store.lock().await;
        store.insert(key.to_string(), (value, std::time::Instant::now(), ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.maybe_fail()?;
        let mut store = self.store.lock().await;
        store.remove(key);
        Ok(())
    }

    async fn flush_all(&self) -> anyhow::Result<()> {
        self.maybe_fail()?;
        self.store.lock().await.clear();
        Ok(())
    }

    async fn ping(&self) -> anyhow::Result<()> {
        self.maybe_fail()
    }

    async fn epoch(&self, namespace: &str) -> anyhow::Result<u64> {
        self.maybe_fail()?;
        Ok(*self.epochs.lock().await.get(namespace).unwrap_or(&0))
    }

    async fn bump_epoch(&self, namespace: &str) -> anyhow::Result<u64> {
        self.maybe_fail()?;
        let mut epochs = self.epochs.lock().await;
        let next = epochs.get(namespace).copied().unwrap_or(0) + 1;
        epochs.insert(namespace.to_string(), next);
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_round_trips() {
        let cache = InMemoryDistributedCache::new();
        cache.set("k", b"v".to_vec(), Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn epoch_bump_is_monotonic() {
        let cache = InMemoryDistributedCache::new();
        assert_eq!(cache.epoch("search").await.unwrap(), 0);
        assert_eq!(cache.bump_epoch("search").await.unwrap(), 1);
        assert_eq!(cache.bump_epoch("search").await.unwrap(), 2);
        assert_eq!(cache.epoch("search").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn simulated_failure_is_transient() {
        let cache = InMemoryDistributedCache::new();
        cache.fail_next_ops(1);
        assert!(cache.set("k", b"v".to_vec(), Duration::from_secs(1)).await.is_err());
        cache.set("k", b"v".to_vec(), Duration::from_secs(1)).await.unwrap();
    }
}
