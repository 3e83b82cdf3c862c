use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Typed event-bus envelope. Untyped `data`/`metadata` maps are the one
/// place this model leans on `serde_json::Value` — the rest of the
/// domain (orders, cryptos, trending) is strongly typed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMessage {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub source: String,
    pub subject: String,
    #[serde(default)]
    pub data: HashMap<String, Value>,
    pub timestamp: DateTime<Utc>,
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default, rename = "retry_count")]
    pub retry_count: u32,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

fn default_version() -> u32 {
    1
}

impl EventMessage {
    /// Derives the dispatch key used to look up a registered handler:
    /// prefer the envelope's own `type`, falling back to the broker
    /// routing key when the envelope omits one.
    pub fn dispatch_key(&self, routing_key: &str) -> String {
        if self.event_type.is_empty() {
            routing_key.to_string()
        } else {
            self.event_type.clone()
        }
    }

    pub fn data_str(&self, key: &str) -> Option<String> {
        self.data.get(key).and_then(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
    }
}
