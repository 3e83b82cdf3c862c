//! AMQP topic-exchange consumer: declares the durable topology, spreads
//! deliveries across a worker pool, and drives retry/DLQ decisions from
//! the `x-retry-count` header.

use crate::events::dispatch::{Dispatcher, HandlerOutcome};
use crate::models::EventMessage;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer as LapinConsumer, ExchangeKind};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const RETRY_HEADER: &str = "x-retry-count";

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub amqp_url: String,
    pub exchange: String,
    pub queue: String,
    pub routing_keys: Vec<String>,
    pub dlq_enabled: bool,
    pub worker_count: usize,
    pub prefetch: u16,
    pub max_retries: u32,
}

pub struct Consumer {
    config: ConsumerConfig,
    dispatcher: Arc<Dispatcher>,
}

impl Consumer {
    pub fn new(config: ConsumerConfig, dispatcher: Arc<Dispatcher>) -> Self {
        Self { config, dispatcher }
    }

    /// Connects, declares the topology, binds the worker pool, and runs
    /// until `cancel` fires. Each worker is an independent lapin channel
    /// consuming the same queue, so message ordering is only preserved
    /// per-routing-key when `worker_count == 1`.
    pub async fn run(&self, cancel: CancellationToken) -> anyhow::Result<()> {
        let connection = Connection::connect(&self.config.amqp_url, ConnectionProperties::default()).await?;
        let setup_channel = connection.create_channel().await?;
        self.declare_topology(&setup_channel).await?;

        let mut handles = Vec::with_capacity(self.config.worker_count);
        for worker_id in 0..self.config.worker_count.max(1) {
            let channel = connection.create_channel().await?;
            channel
                .basic_qos(self.config.prefetch, BasicQosOptions::default())
                .await?;
            let lapin_consumer = channel
                .basic_consume(
                    &self.config.queue,
                    &format!("search-trending-worker-{worker_id}"),
                    BasicConsumeOptions::default(),
                    FieldTable::default(),
                )
                .await?;

            let dispatcher = Arc::clone(&self.dispatcher);
            let config = self.config.clone();
            let channel_for_requeue = channel.clone();
            let worker_cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                run_worker(worker_id, lapin_consumer, channel_for_requeue, dispatcher, config, worker_cancel).await;
            }));
        }

        cancel.cancelled().await;
        for handle in handles {
            let _ = handle.await;
        }
        info!("event consumer shut down");
        Ok(())
    }

    async fn declare_topology(&self, channel: &Channel) -> anyhow::Result<()> {
        channel
            .exchange_declare(
                &self.config.exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions { durable: true, ..Default::default() },
                FieldTable::default(),
            )
            .await?;

        let mut queue_args = FieldTable::default();
        if self.config.dlq_enabled {
            let dlx_name = format!("{}.dlx", self.config.exchange);
            let dlq_name = format!("{}.dlq", self.config.queue);
            channel
                .exchange_declare(&dlx_name, ExchangeKind::Fanout, ExchangeDeclareOptions { durable: true, ..Default::default() }, FieldTable::default())
                .await?;
            channel
                .queue_declare(&dlq_name, QueueDeclareOptions { durable: true, ..Default::default() }, FieldTable::default())
                .await?;
            channel
                .queue_bind(&dlq_name, &dlx_name, "", QueueBindOptions::default(), FieldTable::default())
                .await?;
            queue_args.insert("x-dead-letter-exchange".into(), AMQPValue::LongString(dlx_name.into()));
        }

        channel
            .queue_declare(&self.config.queue, QueueDeclareOptions { durable: true, ..Default::default() }, queue_args)
            .await?;

        for routing_key in &self.config.routing_keys {
            channel
                .queue_bind(&self.config.queue, &self.config.exchange, routing_key, QueueBindOptions::default(), FieldTable::default())
                .await?;
        }
        Ok(())
    }
}

async fn run_worker(
    worker_id: usize,
    mut lapin_consumer: LapinConsumer,
    channel: Channel,
    dispatcher: Arc<Dispatcher>,
    config: ConsumerConfig,
    cancel: CancellationToken,
) {
    use futures_util::StreamExt;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!(worker_id, "worker cancelled");
                return;
            }
            delivery = lapin_consumer.next() => {
                let Some(delivery) = delivery else {
                    warn!(worker_id, "consumer stream closed");
                    return;
                };
                let Ok(delivery) = delivery else {
                    error!(worker_id, "delivery error");
                    continue;
                };

                let retry_count = read_retry_count(&delivery.properties);
                let event = match parse_event(&delivery.data) {
                    Ok(event) => event,
                    Err(err) => {
                        warn!(worker_id, error = %err, "malformed event payload, sending to DLQ");
                        let _ = delivery.nack(BasicNackOptions { requeue: false, ..Default::default() }).await;
                        continue;
                    }
                };

                match dispatcher.dispatch(&event, &delivery.routing_key.to_string()).await {
                    HandlerOutcome::Ack => {
                        let _ = delivery.ack(BasicAckOptions::default()).await;
                    }
                    HandlerOutcome::Fatal(reason) => {
                        warn!(worker_id, %reason, event_id = %event.id, "fatal handler outcome, routing to DLQ");
                        let _ = delivery.nack(BasicNackOptions { requeue: false, ..Default::default() }).await;
                    }
                    HandlerOutcome::Retry(reason) => {
                        if should_route_to_dlq(retry_count, config.max_retries) {
                            warn!(worker_id, %reason, event_id = %event.id, retry_count, "retry budget exhausted, routing to DLQ");
                            let _ = delivery.nack(BasicNackOptions { requeue: false, ..Default::default() }).await;
                        } else {
                            warn!(worker_id, %reason, event_id = %event.id, retry_count, "requeuing with incremented retry count");
                            requeue_with_incremented_count(&channel, &delivery, retry_count).await;
                            let _ = delivery.ack(BasicAckOptions::default()).await;
                        }
                    }
                }
            }
        }
    }
}

/// A message already delivered `max_retries` times (i.e. this is attempt
/// number `max_retries + 1`) is routed to the DLQ instead of requeued,
/// so each message is processed at most `max_retries + 1` times total.
/// `max_retries == 0` routes to the DLQ on the very first failure.
fn should_route_to_dlq(retry_count: u32, max_retries: u32) -> bool {
    retry_count >= max_retries
}

fn read_retry_count(properties: &BasicProperties) -> u32 {
    properties
        .headers()
        .as_ref()
        .and_then(|headers| headers.inner().get(RETRY_HEADER))
        .and_then(|value| match value {
            AMQPValue::LongInt(v) => Some(*v as u32),
            AMQPValue::LongUInt(v) => Some(*v),
            AMQPValue::ShortInt(v) => Some(*v as u32),
            _ => None,
        })
        .unwrap_or(0)
}

/// Re-publishes the same body onto the original exchange/routing key with
/// `x-retry-count` bumped by one. Republishing (rather than native
/// requeue) is what lets the retry count survive as a header instead of
/// being lost on `basic.nack(requeue=true)`.
async fn requeue_with_incremented_count(channel: &Channel, delivery: &lapin::message::Delivery, current_count: u32) {
    let mut headers = delivery.properties.headers().clone().unwrap_or_default();
    headers.insert(RETRY_HEADER.into(), AMQPValue::LongUInt(current_count + 1));
    let properties = delivery.properties.clone().with_headers(headers);

    if let Err(err) = channel
        .basic_publish(
            delivery.exchange.as_str(),
            delivery.routing_key.as_str(),
            BasicPublishOptions::default(),
            &delivery.data,
            properties,
        )
        .await
    {
        error!(error = %err, "failed to republish event for retry");
    }
}

/// Parses the structured envelope, falling back to treating the whole
/// body as a flat legacy payload (`{orderId, eventType, ...}` with no
/// envelope wrapper) when envelope fields are missing.
fn parse_event(body: &[u8]) -> anyhow::Result<EventMessage> {
    if let Ok(event) = serde_json::from_slice::<EventMessage>(body) {
        return Ok(event);
    }

    let legacy: serde_json::Value = serde_json::from_slice(body)?;
    let raw_event_type = legacy
        .get("eventType")
        .or_else(|| legacy.get("event_type"))
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| anyhow::anyhow!("legacy payload missing eventType"))?;
    // Legacy order-service payloads carry the bare action ("executed",
    // "cancelled") rather than the dispatch-key form ("orders.executed")
    // every handler is registered under; normalize so dispatch finds it.
    let event_type = if raw_event_type.contains('.') {
        raw_event_type.to_string()
    } else {
        format!("orders.{raw_event_type}")
    };
    let subject = legacy
        .get("orderId")
        .or_else(|| legacy.get("order_id"))
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default();

    let mut data = std::collections::HashMap::new();
    if let serde_json::Value::Object(map) = &legacy {
        for (k, v) in map {
            data.insert(k.clone(), v.clone());
        }
    }

    Ok(EventMessage {
        id: uuid::Uuid::new_v4().to_string(),
        event_type,
        source: "legacy".to_string(),
        subject: subject.to_string(),
        data,
        timestamp: chrono::Utc::now(),
        version: 1,
        retry_count: 0,
        metadata: std::collections::HashMap::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_bound_allows_max_retries_plus_one_attempts() {
        // max_retries = 3: failures at retry_count 0, 1, 2 requeue (3
        // requeues); the 4th attempt (retry_count 3) routes to the DLQ.
        // Matches scenario 4 (§8): handler fails 4 times, requeued 3
        // times, DLQ on the 4th.
        assert!(!should_route_to_dlq(0, 3));
        assert!(!should_route_to_dlq(1, 3));
        assert!(!should_route_to_dlq(2, 3));
        assert!(should_route_to_dlq(3, 3));
    }

    #[test]
    fn zero_max_retries_skips_the_retry_loop_entirely() {
        assert!(should_route_to_dlq(0, 0));
    }

    #[test]
    fn legacy_flat_payload_parses_with_event_type_fallback() {
        let body = br#"{"orderId": "order-1", "eventType": "orders.cancelled"}"#;
        let event = parse_event(body).unwrap();
        assert_eq!(event.event_type, "orders.cancelled");
        assert_eq!(event.subject, "order-1");
        assert_eq!(event.source, "legacy");
    }

    #[test]
    fn legacy_snake_case_payload_normalizes_bare_event_type() {
        let body = br#"{"order_id":"O-1","user_id":7,"crypto_symbol":"BTC","total_amount":"1000.00","event_type":"executed"}"#;
        let event = parse_event(body).unwrap();
        assert_eq!(event.event_type, "orders.executed");
        assert_eq!(event.subject, "O-1");
        assert_eq!(event.data_str("crypto_symbol").as_deref(), Some("BTC"));
    }

    #[test]
    fn envelope_payload_is_parsed_directly() {
        let body = br#"{"id":"e1","type":"orders.created","source":"orders-service","subject":"order-1","timestamp":"2024-01-01T00:00:00Z"}"#;
        let event = parse_event(body).unwrap();
        assert_eq!(event.id, "e1");
        assert_eq!(event.source, "orders-service");
    }

    #[test]
    fn malformed_payload_fails_to_parse() {
        let body = b"not json at all";
        assert!(parse_event(body).is_err());
    }
}
