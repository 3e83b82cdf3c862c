//! Inputs the trending engine consumes, raised by the event consumer and
//! the search coordinator.

#[derive(Debug, Clone)]
pub enum TrendingEvent {
    Search { id: String, symbol: String, name: String },
    OrderExecuted { id: String, symbol: String, name: String, volume: f64 },
    PriceChange { id: String, symbol: String, name: String, change_pct: f64 },
    Mention { id: String, symbol: String, name: String },
}
