use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// In-memory per-asset trending accumulator (`crate::trending::Engine`'s
/// unit of state). Created lazily on first event and never deleted — decay
/// drives `final_score` toward zero instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendingRecord {
    pub id: String,
    pub symbol: String,
    pub name: String,

    pub search_count: u64,
    pub volume_increase: f64,
    pub price_change_24h: f64,
    pub mentions_count: u64,

    pub search_score: f64,
    pub volume_score: f64,
    pub price_score: f64,
    pub mention_score: f64,
    pub final_score: f64,

    pub last_updated: DateTime<Utc>,
    pub rank: u32,
}

impl TrendingRecord {
    pub fn new(id: impl Into<String>, symbol: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            symbol: symbol.into(),
            name: name.into(),
            search_count: 0,
            volume_increase: 0.0,
            price_change_24h: 0.0,
            mentions_count: 0,
            search_score: 0.0,
            volume_score: 0.0,
            price_score: 0.0,
            mention_score: 0.0,
            final_score: 0.0,
            last_updated: Utc::now(),
            rank: 0,
        }
    }
}
