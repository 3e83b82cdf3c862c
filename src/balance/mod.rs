//! Balance worker: a thin sibling of the event consumer that answers
//! cross-service balance queries over the same message bus
//! (`balance.request` / `balance.response` routing keys). Only the wire
//! contract and bus plumbing live here — the actual balance lookup is
//! injected via `BalanceSource`, and the actual reply transport via
//! `ReplyPublisher`, so this crate never needs to own how balances are
//! stored or how the AMQP channel is held.

use crate::events::dispatch::{EventHandler, HandlerOutcome};
use crate::models::EventMessage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

pub const REQUEST_ROUTING_KEY: &str = "balance.request";
pub const RESPONSE_ROUTING_KEY: &str = "balance.response";

#[derive(Debug, Clone, Deserialize)]
pub struct BalanceRequest {
    pub request_id: String,
    pub user_id: String,
    pub asset: String,
    pub reply_to: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssetBalance {
    pub symbol: String,
    pub available: f64,
    pub locked: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BalanceResponse {
    pub request_id: String,
    pub balances: Vec<AssetBalance>,
    pub error: Option<String>,
}

#[async_trait]
pub trait BalanceSource: Send + Sync {
    async fn balances(&self, user_id: &str, asset: &str) -> anyhow::Result<Vec<AssetBalance>>;
}

/// Publishes an encoded reply onto the bus. `reply_to` carries the
/// routing key the requester is listening on, which for this wire
/// contract is always `RESPONSE_ROUTING_KEY` unless a caller overrides it.
#[async_trait]
pub trait ReplyPublisher: Send + Sync {
    async fn publish_reply(&self, reply_to: &str, payload: Vec<u8>) -> anyhow::Result<()>;
}

/// Event-bus handler: decodes a `balance.request` event's data into a
/// `BalanceRequest`, resolves balances via the injected `BalanceSource`,
/// and publishes a `BalanceResponse` back via the injected
/// `ReplyPublisher`. Decode/publish failures are reported as `Fatal` —
/// a malformed balance request will never succeed on retry.
pub struct BalanceWorker<S: BalanceSource, P: ReplyPublisher> {
    source: S,
    publisher: P,
}

impl<S: BalanceSource, P: ReplyPublisher> BalanceWorker<S, P> {
    pub fn new(source: S, publisher: P) -> Self {
        Self { source, publisher }
    }

    fn decode(event: &EventMessage) -> Result<BalanceRequest, String> {
        let value = Value::Object(event.data.iter().map(|(k, v)| (k.clone(), v.clone())).collect());
        serde_json::from_value(value).map_err(|err| format!("malformed balance request: {err}"))
    }
}

#[async_trait]
impl<S: BalanceSource, P: ReplyPublisher> EventHandler for BalanceWorker<S, P> {
    async fn handle(&self, event: &EventMessage) -> HandlerOutcome {
        let request = match Self::decode(event) {
            Ok(request) => request,
            Err(reason) => return HandlerOutcome::Fatal(reason),
        };

        let response = match self.source.balances(&request.user_id, &request.asset).await {
            Ok(balances) => BalanceResponse { request_id: request.request_id.clone(), balances, error: None },
            Err(err) => BalanceResponse {
                request_id: request.request_id.clone(),
                balances: Vec::new(),
                error: Some(err.to_string()),
            },
        };

        let payload = match serde_json::to_vec(&response) {
            Ok(payload) => payload,
            Err(err) => return HandlerOutcome::Fatal(format!("failed to encode balance response: {err}")),
        };

        let reply_to = if request.reply_to.is_empty() { RESPONSE_ROUTING_KEY } else { &request.reply_to };
        match self.publisher.publish_reply(reply_to, payload).await {
            Ok(()) => HandlerOutcome::Ack,
            Err(err) => HandlerOutcome::Retry(format!("failed to publish balance reply: {err}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct FixedSource;

    #[async_trait]
    impl BalanceSource for FixedSource {
        async fn balances(&self, _user_id: &str, asset: &str) -> anyhow::Result<Vec<AssetBalance>> {
            Ok(vec![AssetBalance { symbol: asset.to_string(), available: 1.0, locked: 0.0 }])
        }
    }

    struct FailingSource;

    #[async_trait]
    impl BalanceSource for FailingSource {
        async fn balances(&self, _user_id: &str, _asset: &str) -> anyhow::Result<Vec<AssetBalance>> {
            anyhow::bail!("balance ledger unreachable")
        }
    }

    #[derive(Default, Clone)]
    struct RecordingPublisher {
        published: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
    }

    #[async_trait]
    impl ReplyPublisher for RecordingPublisher {
        async fn publish_reply(&self, reply_to: &str, payload: Vec<u8>) -> anyhow::Result<()> {
            self.published.lock().unwrap().push((reply_to.to_string(), payload));
            Ok(())
        }
    }

    fn request_event(request_id: &str, user_id: &str, asset: &str, reply_to: &str) -> EventMessage {
        let mut data = HashMap::new();
        data.insert("request_id".to_string(), Value::String(request_id.to_string()));
        data.insert("user_id".to_string(), Value::String(user_id.to_string()));
        data.insert("asset".to_string(), Value::String(asset.to_string()));
        data.insert("reply_to".to_string(), Value::String(reply_to.to_string()));
        EventMessage {
            id: "evt-1".to_string(),
            event_type: REQUEST_ROUTING_KEY.to_string(),
            source: "balance-requester".to_string(),
            subject: user_id.to_string(),
            data,
            timestamp: chrono::Utc::now(),
            version: 1,
            retry_count: 0,
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn valid_request_publishes_a_matching_response() {
        let publisher = RecordingPublisher::default();
        let worker = BalanceWorker::new(FixedSource, publisher.clone());
        let outcome = worker.handle(&request_event("r1", "u1", "BTC", "balance.response")).await;
        assert!(matches!(outcome, HandlerOutcome::Ack));

        let published = publisher.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        let (reply_to, payload) = &published[0];
        assert_eq!(reply_to, "balance.response");
        let response: BalanceResponse = serde_json::from_slice(payload).unwrap();
        assert_eq!(response.request_id, "r1");
        assert_eq!(response.balances[0].symbol, "BTC");
        assert!(response.error.is_none());
    }

    #[tokio::test]
    async fn missing_fields_are_fatal_not_retried() {
        let worker = BalanceWorker::new(FixedSource, RecordingPublisher::default());
        let event = EventMessage {
            id: "evt-2".to_string(),
            event_type: REQUEST_ROUTING_KEY.to_string(),
            source: "balance-requester".to_string(),
            subject: String::new(),
            data: HashMap::new(),
            timestamp: chrono::Utc::now(),
            version: 1,
            retry_count: 0,
            metadata: HashMap::new(),
        };
        assert!(matches!(worker.handle(&event).await, HandlerOutcome::Fatal(_)));
    }

    #[tokio::test]
    async fn source_failure_is_carried_as_an_error_field_not_a_handler_failure() {
        let publisher = RecordingPublisher::default();
        let worker = BalanceWorker::new(FailingSource, publisher.clone());
        let outcome = worker.handle(&request_event("r2", "u1", "ETH", "balance.response")).await;
        assert!(matches!(outcome, HandlerOutcome::Ack));

        let published = publisher.published.lock().unwrap();
        let response: BalanceResponse = serde_json::from_slice(&published[0].1).unwrap();
        assert!(response.error.is_some());
        assert!(response.balances.is_empty());
    }
}
