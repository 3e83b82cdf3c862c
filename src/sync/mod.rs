//! Index synchroniser: turns an order lifecycle event into an index
//! mutation. Deletes on cancellation, otherwise fetches the canonical
//! order from the orders service (falling back to the event's own legacy
//! payload when that service is unreachable) and upserts it.

use crate::error::{AppError, AppResult};
use crate::events::dispatch::{EventHandler, HandlerOutcome};
use crate::index::IndexGateway;
use crate::models::order::{parse_numeric, OrderDocument, OrderKind, OrderStatus, OrderType};
use crate::models::{EventMessage, IndexDocument};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub orders_base_url: String,
    pub api_key: String,
    pub timeout: Duration,
    pub core: String,
}

pub struct Synchroniser {
    http: Client,
    index: Arc<dyn IndexGateway>,
    config: SyncConfig,
}

#[derive(Debug, Deserialize)]
struct OrderApiResponse {
    id: String,
    user_id: String,
    #[serde(rename = "type")]
    order_type: OrderType,
    status: OrderStatus,
    order_kind: OrderKind,
    crypto_symbol: String,
    crypto_name: String,
    quantity: String,
    price: String,
    total_amount: String,
    fee: String,
    created_at: chrono::DateTime<Utc>,
    updated_at: chrono::DateTime<Utc>,
    executed_at: Option<chrono::DateTime<Utc>>,
    cancelled_at: Option<chrono::DateTime<Utc>>,
    error_message: Option<String>,
}

impl Synchroniser {
    pub fn new(index: Arc<dyn IndexGateway>, config: SyncConfig) -> Self {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { http, index, config }
    }

    /// `eventType` drives the branch: `orders.cancelled` deletes the
    /// document outright rather than upserting a cancelled copy, since a
    /// cancelled order is no longer search-relevant. Every other event
    /// type fetches-or-falls-back, builds the document, and upserts it.
    pub async fn sync(&self, order_id: &str, event_type: &str, legacy_payload: Option<&Value>) -> AppResult<()> {
        if event_type == "orders.cancelled" {
            self.index.delete(&self.config.core, order_id).await?;
            self.index.commit(&self.config.core).await?;
            info!(order_id, "deleted cancelled order from index");
            return Ok(());
        }

        let document = match self.fetch_order(order_id).await {
            Ok(doc) => doc,
            Err(err) => {
                warn!(order_id, error = %err, "orders service unreachable, falling back to event payload");
                let payload = legacy_payload.ok_or_else(|| {
                    AppError::UpstreamOrdersUnavailable(format!("no fallback payload for order {order_id}"))
                })?;
                build_from_legacy_payload(order_id, event_type, payload)?
            }
        };

        self.index
            .update(&self.config.core, &[IndexDocument::Order(document)])
            .await?;
        self.index.commit(&self.config.core).await?;
        info!(order_id, "upserted order into index");
        Ok(())
    }

    async fn fetch_order(&self, order_id: &str) -> AppResult<OrderDocument> {
        let url = format!("{}/orders/{order_id}", self.config.orders_base_url.trim_end_matches('/'));
        let response = self
            .http
            .get(&url)
            .header("X-Internal-Service", "search-trending-service")
            .header("X-API-Key", &self.config.api_key)
            .send()
            .await
            .map_err(|e| AppError::UpstreamOrdersUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AppError::UpstreamOrdersUnavailable(format!(
                "orders service returned {}",
                response.status()
            )));
        }

        let body: OrderApiResponse = response
            .json()
            .await
            .map_err(|e| AppError::UpstreamOrdersUnavailable(format!("malformed order response: {e}")))?;

        Ok(order_api_response_to_document(body))
    }
}

fn order_api_response_to_document(body: OrderApiResponse) -> OrderDocument {
    let search_text = OrderDocument::build_search_text(
        &body.id,
        &body.crypto_symbol,
        &body.crypto_name,
        body.order_type,
        body.status,
        body.order_kind,
        &body.quantity,
        &body.price,
        &body.total_amount,
    );

    OrderDocument {
        id: body.id,
        user_id: body.user_id,
        order_type: body.order_type,
        status: body.status,
        order_kind: body.order_kind,
        crypto_symbol: body.crypto_symbol,
        crypto_name: body.crypto_name,
        quantity: parse_numeric(&body.quantity),
        quantity_s: body.quantity,
        price: parse_numeric(&body.price),
        price_s: body.price,
        total_amount: parse_numeric(&body.total_amount),
        total_amount_s: body.total_amount,
        fee: parse_numeric(&body.fee),
        fee_s: body.fee,
        created_at: body.created_at,
        updated_at: body.updated_at,
        executed_at: body.executed_at,
        cancelled_at: body.cancelled_at,
        error_message: body.error_message,
        search_text,
    }
}

/// Adapts `Synchroniser` to the consumer's handler trait: every
/// `orders.*` routing key lands here, keyed by `event.subject` as the
/// order id. A missing subject can never succeed on retry, so it's
/// reported fatal rather than retryable.
pub struct OrderEventHandler {
    synchroniser: Arc<Synchroniser>,
    trending: Option<Arc<crate::trending::Engine>>,
}

impl OrderEventHandler {
    pub fn new(synchroniser: Arc<Synchroniser>) -> Self {
        Self { synchroniser, trending: None }
    }

    /// Also feeds the trending engine's `orderExecuted` input whenever an
    /// `orders.executed` event is handled successfully, alongside the
    /// index upsert.
    pub fn with_trending(mut self, trending: Arc<crate::trending::Engine>) -> Self {
        self.trending = Some(trending);
        self
    }

    fn record_trending_volume(&self, event: &EventMessage) {
        let Some(trending) = &self.trending else { return };
        if event.event_type != "orders.executed" {
            return;
        }
        let symbol = event.data_str("crypto_symbol").or_else(|| event.data_str("cryptoSymbol"));
        let Some(symbol) = symbol.filter(|s| !s.is_empty()) else {
            return;
        };
        let name = event.data_str("crypto_name").or_else(|| event.data_str("cryptoName")).unwrap_or_else(|| symbol.clone());
        let volume = event
            .data_str("total_amount")
            .or_else(|| event.data_str("totalAmount"))
            .and_then(|s| s.parse::<f64>().ok())
            .unwrap_or(0.0);
        trending.record_event(crate::trending::TrendingEvent::OrderExecuted {
            id: symbol.to_lowercase(),
            symbol,
            name,
            volume,
        });
    }
}

#[async_trait]
impl EventHandler for OrderEventHandler {
    async fn handle(&self, event: &EventMessage) -> HandlerOutcome {
        if event.subject.is_empty() {
            return HandlerOutcome::Fatal("order event missing subject".to_string());
        }

        let legacy_payload = Value::Object(event.data.clone().into_iter().collect());
        match self.synchroniser.sync(&event.subject, &event.event_type, Some(&legacy_payload)).await {
            Ok(()) => {
                self.record_trending_volume(event);
                HandlerOutcome::Ack
            }
            Err(AppError::UpstreamOrdersUnavailable(msg)) | Err(AppError::IndexUnavailable(msg)) => {
                HandlerOutcome::Retry(msg)
            }
            Err(err) => HandlerOutcome::Fatal(err.to_string()),
        }
    }
}

fn parse_order_type(raw: &str) -> OrderType {
    match raw {
        "sell" => OrderType::Sell,
        _ => OrderType::Buy,
    }
}

fn parse_order_status(raw: &str) -> OrderStatus {
    match raw {
        "executed" => OrderStatus::Executed,
        "cancelled" => OrderStatus::Cancelled,
        "failed" => OrderStatus::Failed,
        _ => OrderStatus::Pending,
    }
}

fn parse_order_kind(raw: &str) -> OrderKind {
    match raw {
        "limit" => OrderKind::Limit,
        _ => OrderKind::Market,
    }
}

/// Builds a document straight from the event's own embedded payload when
/// the orders service can't be reached. `executedAt`/`cancelledAt` are
/// stamped with the current time based on `event_type` since the legacy
/// payload doesn't carry them.
fn build_from_legacy_payload(order_id: &str, event_type: &str, payload: &Value) -> AppResult<OrderDocument> {
    // Legacy producers are inconsistent about casing (`crypto_symbol` per
    // the snake_case order-service payload vs. `cryptoSymbol` elsewhere);
    // accept either so a well-formed payload is never rejected as malformed.
    let field = |camel: &str, snake: &str| -> String {
        payload
            .get(camel)
            .or_else(|| payload.get(snake))
            .and_then(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .unwrap_or_default()
    };

    let order_type_s = field("orderType", "order_type");
    let status_s = field("status", "status");
    let order_kind_s = field("orderKind", "order_kind");
    let crypto_symbol = field("cryptoSymbol", "crypto_symbol");
    let crypto_name = field("cryptoName", "crypto_name");
    let quantity_s = field("quantity", "quantity");
    let price_s = field("price", "price");
    let total_amount_s = field("totalAmount", "total_amount");
    let fee_s = field("fee", "fee");

    if crypto_symbol.is_empty() {
        return Err(AppError::MalformedEvent(format!(
            "legacy payload for order {order_id} missing cryptoSymbol"
        )));
    }

    let order_type = parse_order_type(&order_type_s);
    let order_kind = parse_order_kind(&order_kind_s);
    let status = if status_s.is_empty() {
        match event_type {
            "orders.executed" => OrderStatus::Executed,
            "orders.cancelled" => OrderStatus::Cancelled,
            _ => OrderStatus::Pending,
        }
    } else {
        parse_order_status(&status_s)
    };

    let now = Utc::now();
    let executed_at = (event_type == "orders.executed").then_some(now);
    let cancelled_at = (event_type == "orders.cancelled").then_some(now);

    let search_text = OrderDocument::build_search_text(
        order_id, &crypto_symbol, &crypto_name, order_type, status, order_kind, &quantity_s, &price_s, &total_amount_s,
    );

    Ok(OrderDocument {
        id: order_id.to_string(),
        user_id: field("userId", "user_id"),
        order_type,
        status,
        order_kind,
        crypto_symbol,
        crypto_name,
        quantity: parse_numeric(&quantity_s),
        quantity_s,
        price: parse_numeric(&price_s),
        price_s,
        total_amount: parse_numeric(&total_amount_s),
        total_amount_s,
        fee: parse_numeric(&fee_s),
        fee_s,
        created_at: now,
        updated_at: now,
        executed_at,
        cancelled_at,
        error_message: None,
        search_text,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_payload_without_symbol_is_rejected() {
        let payload = serde_json::json!({ "status": "executed" });
        let result = build_from_legacy_payload("order-1", "orders.executed", &payload);
        assert!(result.is_err());
    }

    #[test]
    fn executed_event_stamps_executed_at() {
        let payload = serde_json::json!({
            "cryptoSymbol": "BTC",
            "cryptoName": "Bitcoin",
            "status": "executed",
            "quantity": "1.5",
            "price": "65000",
            "totalAmount": "97500",
        });
        let doc = build_from_legacy_payload("order-1", "orders.executed", &payload).unwrap();
        assert!(doc.executed_at.is_some());
        assert!(doc.cancelled_at.is_none());
        assert_eq!(doc.quantity, 1.5);
    }

    #[test]
    fn missing_status_falls_back_to_event_type_derived_status() {
        let payload = serde_json::json!({
            "cryptoSymbol": "ETH",
            "cryptoName": "Ethereum",
            "quantity": "2",
            "price": "3000",
            "totalAmount": "6000",
        });
        let doc = build_from_legacy_payload("order-2", "orders.cancelled", &payload).unwrap();
        assert_eq!(doc.status, OrderStatus::Cancelled);
    }

    #[test]
    fn snake_case_legacy_payload_is_accepted() {
        let payload = serde_json::json!({
            "order_id": "O-1",
            "user_id": 7,
            "crypto_symbol": "BTC",
            "total_amount": "1000.00",
            "event_type": "executed",
        });
        let doc = build_from_legacy_payload("O-1", "orders.executed", &payload).unwrap();
        assert_eq!(doc.crypto_symbol, "BTC");
        assert_eq!(doc.user_id, "7");
        assert_eq!(doc.total_amount, 1000.00);
        assert_eq!(doc.total_amount_s, "1000.00");
        assert!(doc.executed_at.is_some());
    }
}
