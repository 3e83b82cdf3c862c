//! Trending engine: per-asset weighted score fusion with exponential time
//! decay, refreshed by a background rank+decay loop.
//!
//! All state lives behind a single `parking_lot::Mutex` — the teacher's
//! documented choice for short critical sections elsewhere in this
//! codebase (see `cache::local`). Score computation itself is cheap
//! arithmetic, so there is no value in finer-grained locking here.

pub mod events;
pub mod handler;
pub mod score;

pub use events::TrendingEvent;
pub use handler::MarketEventHandler;

use crate::index::IndexGateway;
use crate::models::TrendingRecord;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub update_interval: Duration,
    pub score_decay_rate: f64,
    pub weight_search: f64,
    pub weight_volume: f64,
    pub weight_price: f64,
    pub weight_mention: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            update_interval: Duration::from_secs(5 * 60),
            score_decay_rate: 0.95,
            weight_search: 0.4,
            weight_volume: 0.3,
            weight_price: 0.1,
            weight_mention: 0.2,
        }
    }
}

pub struct Engine {
    records: Mutex<HashMap<String, TrendingRecord>>,
    config: EngineConfig,
    running: Arc<AtomicBool>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
    write_back: Option<(Arc<dyn IndexGateway>, String)>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            config,
            running: Arc::new(AtomicBool::new(false)),
            loop_handle: Mutex::new(None),
            write_back: None,
        }
    }

    /// Enables fire-and-forget write-back of the live `final_score` to the
    /// index after every event, via the atomic trending-field update.
    pub fn with_write_back(mut self, index: Arc<dyn IndexGateway>, core: String) -> Self {
        self.write_back = Some((index, core));
        self
    }

    fn entry(records: &mut HashMap<String, TrendingRecord>, id: &str, symbol: &str, name: &str) -> &mut TrendingRecord {
        records
            .entry(id.to_string())
            .or_insert_with(|| TrendingRecord::new(id.to_string(), symbol.to_string(), name.to_string()))
    }

    /// On every input: update the raw counter, recompute the component
    /// and final scores for that one asset, then fire off a best-effort
    /// write-back of the new score to the index.
    pub fn record_event(self: &Arc<Self>, event: TrendingEvent) {
        let now = Utc::now();
        let (id, final_score) = {
            let mut records = self.records.lock();
            let record = match &event {
                TrendingEvent::Search { id, symbol, name } => {
                    let record = Self::entry(&mut records, id, symbol, name);
                    record.search_count += 1;
                    record
                }
                TrendingEvent::OrderExecuted { id, symbol, name, volume } => {
                    let record = Self::entry(&mut records, id, symbol, name);
                    // Raw order notional is in base currency units; the
                    // volume component score works in millions so a
                    // single order can't single-handedly saturate it.
                    record.volume_increase += volume / 1_000_000.0;
                    record
                }
                TrendingEvent::PriceChange { id, symbol, name, change_pct } => {
                    let record = Self::entry(&mut records, id, symbol, name);
                    record.price_change_24h = *change_pct;
                    record
                }
                TrendingEvent::Mention { id, symbol, name } => {
                    let record = Self::entry(&mut records, id, symbol, name);
                    record.mentions_count += 1;
                    record
                }
            };
            record.last_updated = now;
            score::recompute(record, &self.config, now);
            (record.id.clone(), record.final_score)
        };

        self.spawn_write_back(id, final_score);
    }

    fn spawn_write_back(self: &Arc<Self>, id: String, score: f64) {
        let Some((index, core)) = self.write_back.clone() else {
            return;
        };
        tokio::spawn(async move {
            if let Err(err) = index.update_trending_score(&core, &id, score).await {
                warn!(%id, error = %err, "trending score write-back failed");
            }
        });
    }

    /// The background loop's tick: a rank pass over the scores as they
    /// stand (each already kept fresh by `record_event`), followed by a
    /// decay pass that fades components for assets nobody has touched in
    /// over an hour.
    pub fn recompute(&self) {
        let mut records = self.records.lock();

        let mut ranked: Vec<&mut TrendingRecord> = records.values_mut().collect();
        ranked.sort_by(|a, b| b.final_score.partial_cmp(&a.final_score).unwrap_or(std::cmp::Ordering::Equal));
        for (idx, record) in ranked.into_iter().enumerate() {
            record.rank = idx as u32 + 1;
        }

        let now = Utc::now();
        for record in records.values_mut() {
            score::decay_tick(record, &self.config, now);
        }
    }

    /// O(1) lookup by `id`, the map's actual key — callers that only have
    /// a `symbol` must resolve it to an `id` themselves rather than make
    /// every lookup pay for a linear scan.
    pub fn score(&self, id: &str) -> Option<f64> {
        self.records.lock().get(id).map(|r| r.final_score)
    }

    /// Top `limit` assets by `final_score`, restricted to records updated
    /// within `period` and exceeding the "worth surfacing" cutoff. The
    /// cutoff is intentionally below the `CryptoDocument::is_trending`
    /// flagging threshold — a rank list can include assets that aren't
    /// flagged as trending yet.
    pub fn top(&self, limit: usize, period: &str) -> Vec<TrendingRecord> {
        let cutoff = period_cutoff(period);
        let records = self.records.lock();
        let mut matching: Vec<TrendingRecord> = records
            .values()
            .filter(|r| r.final_score > 10.0)
            .filter(|r| cutoff.map(|c| r.last_updated >= c).unwrap_or(true))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.final_score.partial_cmp(&a.final_score).unwrap_or(std::cmp::Ordering::Equal));
        matching.truncate(limit);
        for (idx, record) in matching.iter_mut().enumerate() {
            record.rank = idx as u32 + 1;
        }
        matching
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Idempotent: calling `start` while already running is a no-op.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let engine = Arc::clone(self);
        let running = Arc::clone(&self.running);
        let interval = self.config.update_interval;
        let handle = tokio::spawn(async move {
            info!(?interval, "trending engine loop started");
            let mut ticker = tokio::time::interval(interval);
            while running.load(Ordering::SeqCst) {
                ticker.tick().await;
                engine.recompute();
                debug!("trending engine tick complete");
            }
        });
        *self.loop_handle.lock() = Some(handle);
    }

    /// Idempotent: calling `stop` while already stopped is a no-op.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let handle = self.loop_handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        info!("trending engine loop stopped");
    }
}

fn period_cutoff(period: &str) -> Option<chrono::DateTime<Utc>> {
    let now = Utc::now();
    let window = match period {
        "1h" => chrono::Duration::hours(1),
        "24h" => chrono::Duration::hours(24),
        "7d" => chrono::Duration::days(7),
        "30d" => chrono::Duration::days(30),
        _ => return None,
    };
    Some(now - window)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_search_events_accumulate_count() {
        let engine = Arc::new(Engine::new(EngineConfig::default()));
        for _ in 0..5 {
            engine.record_event(TrendingEvent::Search {
                id: "btc".to_string(),
                symbol: "BTC".to_string(),
                name: "Bitcoin".to_string(),
            });
        }
        engine.recompute();
        assert!(engine.score("btc").unwrap() > 0.0);
    }

    #[test]
    fn top_ranks_by_descending_final_score() {
        let engine = Arc::new(Engine::new(EngineConfig::default()));
        for _ in 0..20 {
            engine.record_event(TrendingEvent::Search { id: "btc".into(), symbol: "BTC".into(), name: "Bitcoin".into() });
        }
        for _ in 0..2 {
            engine.record_event(TrendingEvent::Search { id: "xrp".into(), symbol: "XRP".into(), name: "Ripple".into() });
        }
        engine.recompute();
        let top = engine.top(10, "24h");
        assert!(top.len() <= 2);
        if top.len() == 2 {
            assert!(top[0].final_score >= top[1].final_score);
            assert_eq!(top[0].rank, 1);
            assert_eq!(top[1].rank, 2);
        }
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let engine = Arc::new(Engine::new(EngineConfig { update_interval: Duration::from_secs(60), ..Default::default() }));
        engine.start();
        engine.start();
        assert!(engine.is_running());
        engine.stop().await;
        assert!(!engine.is_running());
    }

    #[test]
    fn repeated_search_with_no_elapsed_time_is_non_decreasing() {
        let engine = Arc::new(Engine::new(EngineConfig::default()));
        let mut last = 0.0;
        for _ in 0..10 {
            engine.record_event(TrendingEvent::Search { id: "btc".into(), symbol: "BTC".into(), name: "Bitcoin".into() });
            let score = engine.score("btc").unwrap();
            assert!(score >= last);
            last = score;
        }
    }

    #[tokio::test]
    async fn write_back_fires_after_every_event() {
        use crate::index::ParamMap;
        use async_trait::async_trait;
        use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

        #[derive(Default)]
        struct RecordingIndex {
            calls: AtomicUsize,
        }

        #[async_trait]
        impl IndexGateway for RecordingIndex {
            async fn search(&self, _core: &str, _params: &ParamMap) -> crate::error::AppResult<crate::index::client::SearchResponse> {
                unimplemented!()
            }
            async fn update(&self, _core: &str, _documents: &[crate::models::IndexDocument]) -> crate::error::AppResult<()> {
                Ok(())
            }
            async fn delete(&self, _core: &str, _id: &str) -> crate::error::AppResult<()> {
                Ok(())
            }
            async fn delete_by_query(&self, _core: &str, _query: &str) -> crate::error::AppResult<()> {
                Ok(())
            }
            async fn commit(&self, _core: &str) -> crate::error::AppResult<()> {
                Ok(())
            }
            async fn optimize(&self, _core: &str) -> crate::error::AppResult<()> {
                Ok(())
            }
            async fn ping(&self, _core: &str) -> crate::error::AppResult<()> {
                Ok(())
            }
            async fn document_count(&self, _core: &str) -> crate::error::AppResult<u64> {
                Ok(0)
            }
            async fn suggest(&self, _core: &str, _query: &str, _limit: u32) -> crate::error::AppResult<Vec<String>> {
                Ok(vec![])
            }
            async fn update_trending_score(&self, _core: &str, _id: &str, _score: f64) -> crate::error::AppResult<()> {
                self.calls.fetch_add(1, AtomicOrdering::SeqCst);
                Ok(())
            }
        }

        let index = Arc::new(RecordingIndex::default());
        let engine = Arc::new(
            Engine::new(EngineConfig::default()).with_write_back(Arc::clone(&index) as Arc<dyn IndexGateway>, "cryptos".to_string()),
        );
        engine.record_event(TrendingEvent::Search { id: "btc".into(), symbol: "BTC".into(), name: "Bitcoin".into() });

        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(index.calls.load(AtomicOrdering::SeqCst), 1);
    }
}
