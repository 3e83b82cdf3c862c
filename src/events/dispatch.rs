//! Dispatch-by-event-type: maps an `EventMessage` to a handler and turns
//! its result into an acknowledgement decision.

use crate::models::EventMessage;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

pub enum HandlerOutcome {
    Ack,
    /// Handler failed but the failure is expected to be transient
    /// (upstream timeout, lock contention) — worth a requeue.
    Retry(String),
    /// Handler failed in a way that will never succeed on retry
    /// (malformed payload, unknown asset) — route straight to the DLQ.
    Fatal(String),
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &EventMessage) -> HandlerOutcome;
}

/// Routes events to handlers by `event_type`. An event whose type has no
/// registered handler is acknowledged and dropped rather than retried
/// forever — an unknown type will never grow a handler mid-flight, so
/// retrying it is pure waste.
#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<String, Arc<dyn EventHandler>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, event_type: impl Into<String>, handler: Arc<dyn EventHandler>) {
        self.handlers.insert(event_type.into(), handler);
    }

    /// Looks the handler up by the envelope's own `type`, falling back to
    /// the broker routing key when the envelope omits one (see
    /// `EventMessage::dispatch_key`).
    pub async fn dispatch(&self, event: &EventMessage, routing_key: &str) -> HandlerOutcome {
        let key = event.dispatch_key(routing_key);
        match self.handlers.get(&key) {
            Some(handler) => handler.handle(event).await,
            None => HandlerOutcome::Ack,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;

    struct AlwaysRetry;

    #[async_trait]
    impl EventHandler for AlwaysRetry {
        async fn handle(&self, _event: &EventMessage) -> HandlerOutcome {
            HandlerOutcome::Retry("upstream timeout".to_string())
        }
    }

    fn sample_event(event_type: &str) -> EventMessage {
        EventMessage {
            id: "evt-1".to_string(),
            event_type: event_type.to_string(),
            source: "orders-service".to_string(),
            subject: "order-1".to_string(),
            data: StdHashMap::new(),
            timestamp: chrono::Utc::now(),
            version: 1,
            retry_count: 0,
            metadata: StdHashMap::new(),
        }
    }

    #[tokio::test]
    async fn unregistered_event_type_is_acked() {
        let dispatcher = Dispatcher::new();
        matches!(dispatcher.dispatch(&sample_event("unknown.thing"), "unknown.thing").await, HandlerOutcome::Ack);
    }

    #[tokio::test]
    async fn registered_handler_is_invoked() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.register("orders.created", Arc::new(AlwaysRetry));
        let outcome = dispatcher.dispatch(&sample_event("orders.created"), "orders.created").await;
        assert!(matches!(outcome, HandlerOutcome::Retry(_)));
    }
}
