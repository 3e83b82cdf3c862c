//! Process lifecycle: startup sequencing (cache, index, coordinator,
//! trending engine, consumer, background warm) and shutdown sequencing
//! (cancel, drain, stop each subsystem even if an earlier one failed).

use crate::cache::CacheManager;
use crate::config::Config;
use crate::events::{Consumer, Dispatcher};
use crate::search::Coordinator;
use crate::trending::Engine as TrendingEngine;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub struct Services {
    pub coordinator: Arc<Coordinator>,
    pub cache: Arc<CacheManager>,
    pub trending: Arc<TrendingEngine>,
    pub consumer: Arc<Consumer>,
    pub consumer_cancel: CancellationToken,
    pub shutdown_tx: watch::Sender<bool>,
    consumer_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Services {
    pub fn new(
        coordinator: Arc<Coordinator>,
        cache: Arc<CacheManager>,
        trending: Arc<TrendingEngine>,
        consumer: Arc<Consumer>,
        consumer_cancel: CancellationToken,
        shutdown_tx: watch::Sender<bool>,
    ) -> Self {
        Self {
            coordinator,
            cache,
            trending,
            consumer,
            consumer_cancel,
            shutdown_tx,
            consumer_handle: Mutex::new(None),
        }
    }

    /// Spawns the trending engine's background loop, starts the consumer
    /// on its own task, and kicks off a bounded cache warm — bounded to
    /// two minutes so a slow index doesn't hold up the rest of startup
    /// indefinitely.
    pub fn start(&self, config: &Config) {
        self.trending.start();

        let consumer = Arc::clone(&self.consumer);
        let cancel = self.consumer_cancel.clone();
        let handle = tokio::spawn(async move {
            if let Err(err) = consumer.run(cancel).await {
                error!(error = %err, "event consumer exited with error");
            }
        });
        *self.consumer_handle.lock() = Some(handle);

        let coordinator = Arc::clone(&self.coordinator);
        let warm_timeout = Duration::from_secs(120);
        tokio::spawn(async move {
            match tokio::time::timeout(warm_timeout, coordinator.warm_cache()).await {
                Ok(Ok(())) => info!("startup cache warm complete"),
                Ok(Err(err)) => warn!(error = %err, "startup cache warm failed"),
                Err(_) => warn!("startup cache warm timed out after 2 minutes"),
            }
        });

        let _ = config;
    }

    /// Cancels the consumer, gives in-flight requests 30 seconds to
    /// drain, then stops each subsystem in turn: trending, consumer,
    /// cache. Every stop is attempted regardless of whether an earlier
    /// one failed, so a stuck trending loop never prevents the consumer
    /// or cache from being told to shut down.
    pub async fn shutdown(&self) {
        info!("shutdown initiated");
        let _ = self.shutdown_tx.send(true);
        self.consumer_cancel.cancel();

        tokio::time::sleep(Duration::from_secs(30)).await;

        self.trending.stop().await;
        info!("trending engine stopped");

        if let Some(handle) = self.consumer_handle.lock().take() {
            if let Err(err) = handle.await {
                warn!(error = %err, "event consumer task panicked during shutdown");
            }
        }
        info!("event consumer stopped");

        self.cache.close().await;
        info!("cache tier closed");

        info!("shutdown complete");
    }
}

pub async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let ctrl_c = tokio::signal::ctrl_c();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c"),
        _ = sigterm.recv() => info!("received SIGTERM"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheManager, InMemoryDistributedCache};
    use crate::events::dispatch::Dispatcher as EventDispatcher;
    use crate::events::consumer::ConsumerConfig;
    use crate::index::client::IndexClient;

    #[tokio::test]
    async fn shutdown_cancels_consumer_token_and_stops_trending() {
        let cache = Arc::new(CacheManager::new(10, 2, Arc::new(InMemoryDistributedCache::new())));
        let index: Arc<dyn crate::index::IndexGateway> = Arc::new(IndexClient::new(
            "http://localhost:8983/solr".to_string(),
            Duration::from_secs(1),
            1,
            Duration::from_millis(1),
        ));
        let trending = Arc::new(TrendingEngine::new(Default::default()));
        trending.start();
        let coordinator = Arc::new(Coordinator::new(Arc::clone(&cache), index, Arc::clone(&trending), "orders".to_string()));
        let dispatcher = Arc::new(EventDispatcher::new());
        let consumer_cancel = CancellationToken::new();
        let consumer = Arc::new(Consumer::new(
            ConsumerConfig {
                amqp_url: "amqp://localhost".to_string(),
                exchange: "events".to_string(),
                queue: "search-trending".to_string(),
                routing_keys: vec!["orders.*".to_string()],
                dlq_enabled: true,
                worker_count: 1,
                prefetch: 10,
                max_retries: 3,
            },
            dispatcher,
        ));
        let (shutdown_tx, _rx) = watch::channel(false);

        let services = Services::new(coordinator, cache, Arc::clone(&trending), consumer, consumer_cancel.clone(), shutdown_tx);

        assert!(trending.is_running());
        let services = Arc::new(services);
        let shutdown_services = Arc::clone(&services);
        let handle = tokio::spawn(async move { shutdown_services.shutdown().await });
        // shutdown sleeps 30s by design; we only assert the cancel signal fired immediately.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(consumer_cancel.is_cancelled());
        handle.abort();
    }
}
