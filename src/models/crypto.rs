use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The fixed set of categories a crypto document (and a search request's
/// `categories` filter) may carry. Anything outside this set is rejected
/// at request validation rather than silently passed through to the
/// index as a filter that can never match.
pub const CATEGORIES: &[&str] = &[
    "currency",
    "defi",
    "layer1",
    "layer2",
    "nft",
    "gaming",
    "meme",
    "stablecoin",
    "exchange",
    "infrastructure",
    "privacy",
    "metaverse",
];

/// An indexed cryptocurrency asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CryptoDocument {
    pub symbol: String,
    pub name: String,
    pub description: String,

    pub price: f64,
    pub volume_24h: f64,
    pub market_cap: f64,
    pub price_change_24h: f64,
    pub price_change_7d: f64,

    pub categories: Vec<String>,
    pub tags: Vec<String>,
    pub platform: String,

    pub trending_score: f64,
    pub is_trending: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CryptoDocument {
    /// `isTrending` flips to true once `trendingScore` passes 50. This
    /// threshold is intentionally different from the `> 10` cutoff
    /// `trending::Engine::top` uses to filter the ranked list — one flags
    /// an asset as trending, the other decides whether it's worth
    /// surfacing at all. See DESIGN.md for the reasoning.
    pub fn recompute_is_trending(&mut self) {
        self.is_trending = self.trending_score > 50.0;
    }

    pub fn with_trending_score(mut self, score: f64) -> Self {
        self.trending_score = score;
        self.recompute_is_trending();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CryptoDocument {
        CryptoDocument {
            symbol: "BTC".into(),
            name: "Bitcoin".into(),
            description: String::new(),
            price: 65000.0,
            volume_24h: 1.0e9,
            market_cap: 1.2e12,
            price_change_24h: 2.5,
            price_change_7d: 5.0,
            categories: vec!["currency".into()],
            tags: vec![],
            platform: "native".into(),
            trending_score: 0.0,
            is_trending: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn is_trending_flips_above_fifty() {
        let doc = sample().with_trending_score(51.0);
        assert!(doc.is_trending);
        let doc = sample().with_trending_score(50.0);
        assert!(!doc.is_trending);
    }
}
