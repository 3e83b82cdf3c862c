use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Executed,
    Cancelled,
    Failed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Executed => "executed",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    Market,
    Limit,
}

/// An indexed trading order.
///
/// Numeric fields are stored both as parsed `f64` (for sorting and range
/// queries) and as their original canonical strings with an `_s` suffix
/// (for faithful display) — the index schema observed in production writes
/// both, so both are preserved here rather than picking one (see DESIGN.md,
/// open question on `_s`-suffixed fields).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderDocument {
    pub id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub order_kind: OrderKind,
    pub crypto_symbol: String,
    pub crypto_name: String,

    pub quantity: f64,
    pub quantity_s: String,
    pub price: f64,
    pub price_s: String,
    pub total_amount: f64,
    pub total_amount_s: String,
    pub fee: f64,
    pub fee_s: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,

    pub error_message: Option<String>,

    /// Space-joined concatenation of the textual fields, used for
    /// tokenisation by the external index.
    pub search_text: String,
}

impl OrderDocument {
    /// Space-joined concatenation of id, symbol, name, type, status,
    /// order kind, quantity, price, and total amount, in that order.
    pub fn build_search_text(
        id: &str,
        crypto_symbol: &str,
        crypto_name: &str,
        order_type: OrderType,
        status: OrderStatus,
        order_kind: OrderKind,
        quantity_s: &str,
        price_s: &str,
        total_amount_s: &str,
    ) -> String {
        let type_str = match order_type {
            OrderType::Buy => "buy",
            OrderType::Sell => "sell",
        };
        let kind_str = match order_kind {
            OrderKind::Market => "market",
            OrderKind::Limit => "limit",
        };
        [
            id,
            crypto_symbol,
            crypto_name,
            type_str,
            status.as_str(),
            kind_str,
            quantity_s,
            price_s,
            total_amount_s,
        ]
        .join(" ")
    }
}

/// Parses a canonical numeric string into an `f64`, defaulting to `0.0` on
/// failure rather than rejecting the document — upstream numeric strings
/// are trusted but not guaranteed well-formed (legacy payloads in
/// particular).
pub fn parse_numeric(raw: &str) -> f64 {
    raw.trim().parse::<f64>().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_text_joins_expected_fields() {
        let text = OrderDocument::build_search_text(
            "O-1",
            "BTC",
            "Bitcoin",
            OrderType::Buy,
            OrderStatus::Executed,
            OrderKind::Limit,
            "1.5",
            "65000.00",
            "97500.00",
        );
        assert_eq!(text, "O-1 BTC Bitcoin buy executed limit 1.5 65000.00 97500.00");
    }

    #[test]
    fn parse_numeric_defaults_on_garbage() {
        assert_eq!(parse_numeric("not-a-number"), 0.0);
        assert_eq!(parse_numeric("42.5"), 42.5);
    }
}
