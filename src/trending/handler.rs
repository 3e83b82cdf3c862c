//! Adapts `market.*` / `search.query` bus events into trending engine
//! inputs. Order-lifecycle events are handled separately by
//! `crate::sync::OrderEventHandler`, which also feeds the engine's
//! `OrderExecuted` input on `orders.executed`.

use crate::events::dispatch::{EventHandler, HandlerOutcome};
use crate::models::EventMessage;
use crate::trending::{Engine, TrendingEvent};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

pub struct MarketEventHandler {
    engine: Arc<Engine>,
}

impl MarketEventHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }
}

fn numeric_field(event: &EventMessage, keys: &[&str]) -> f64 {
    keys.iter()
        .find_map(|key| event.data.get(*key))
        .and_then(Value::as_f64)
        .unwrap_or(0.0)
}

#[async_trait]
impl EventHandler for MarketEventHandler {
    async fn handle(&self, event: &EventMessage) -> HandlerOutcome {
        let symbol = event
            .data_str("symbol")
            .or_else(|| event.data_str("crypto_symbol"))
            .or_else(|| (!event.subject.is_empty()).then(|| event.subject.clone()))
            .unwrap_or_default();
        if symbol.is_empty() {
            return HandlerOutcome::Fatal("market/search event missing a crypto symbol".to_string());
        }
        let name = event.data_str("name").or_else(|| event.data_str("crypto_name")).unwrap_or_else(|| symbol.clone());
        let id = symbol.to_lowercase();

        match event.event_type.as_str() {
            "market.price_change" => {
                let change_pct = numeric_field(event, &["change_pct", "percent_change", "price_change_24h"]);
                self.engine.record_event(TrendingEvent::PriceChange { id, symbol, name, change_pct });
            }
            // The engine defines only one volume-accumulating input
            // (`orderExecuted`); a market-wide volume surge feeds the
            // same counter rather than introducing a parallel one.
            "market.volume_change" => {
                let volume = numeric_field(event, &["volume", "volume_increase", "volume_delta"]);
                self.engine.record_event(TrendingEvent::OrderExecuted { id, symbol, name, volume });
            }
            "search.query" => {
                self.engine.record_event(TrendingEvent::Search { id, symbol, name });
            }
            _ => return HandlerOutcome::Ack,
        }

        HandlerOutcome::Ack
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trending::EngineConfig;
    use std::collections::HashMap;

    fn event(event_type: &str, data: HashMap<String, Value>) -> EventMessage {
        EventMessage {
            id: "e1".to_string(),
            event_type: event_type.to_string(),
            source: "market-feed".to_string(),
            subject: "BTC".to_string(),
            data,
            timestamp: chrono::Utc::now(),
            version: 1,
            retry_count: 0,
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn price_change_event_updates_the_engine() {
        let engine = Arc::new(Engine::new(EngineConfig::default()));
        let handler = MarketEventHandler::new(Arc::clone(&engine));
        let mut data = HashMap::new();
        data.insert("symbol".to_string(), Value::String("BTC".to_string()));
        data.insert("change_pct".to_string(), serde_json::json!(12.5));

        let outcome = handler.handle(&event("market.price_change", data)).await;
        assert!(matches!(outcome, HandlerOutcome::Ack));
        assert!(engine.score("BTC").unwrap() > 0.0);
    }

    #[tokio::test]
    async fn missing_symbol_is_fatal() {
        let engine = Arc::new(Engine::new(EngineConfig::default()));
        let handler = MarketEventHandler::new(engine);
        let mut event = event("market.price_change", HashMap::new());
        event.subject = String::new();
        assert!(matches!(handler.handle(&event).await, HandlerOutcome::Fatal(_)));
    }

    #[tokio::test]
    async fn search_query_event_increments_search_count() {
        let engine = Arc::new(Engine::new(EngineConfig::default()));
        let handler = MarketEventHandler::new(Arc::clone(&engine));
        let outcome = handler.handle(&event("search.query", HashMap::new())).await;
        assert!(matches!(outcome, HandlerOutcome::Ack));
        assert!(engine.score("BTC").is_some());
    }
}
