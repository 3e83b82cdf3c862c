//! Search coordinator: the façade the HTTP layer calls into. Owns the
//! cache-first read path, fans out to the index gateway and query
//! translator, and overlays live trending scores onto crypto results.

pub mod request;

pub use request::SearchRequest;

use crate::cache::{key as cache_key, ttl, CacheManager};
use crate::error::{AppError, AppResult};
use crate::index::facets::extract_facets;
use crate::index::{IndexGateway, ParamMap};
use crate::models::IndexDocument;
use crate::query::translate::translate_search;
use crate::query::translate_suggest;
use crate::trending::Engine as TrendingEngine;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub docs: Vec<Value>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub facets: Value,
    pub cached: bool,
}

pub struct Coordinator {
    cache: Arc<CacheManager>,
    index: Arc<dyn IndexGateway>,
    trending: Arc<TrendingEngine>,
    core: String,
}

impl Coordinator {
    pub fn new(
        cache: Arc<CacheManager>,
        index: Arc<dyn IndexGateway>,
        trending: Arc<TrendingEngine>,
        core: String,
    ) -> Self {
        Self { cache, index, trending, core }
    }

    pub async fn search(&self, req: SearchRequest) -> AppResult<SearchResponse> {
        let req = req.validate()?;
        let filters = collect_filter_pairs(&req);
        let cache_key = cache_key::search_key(&req.q, req.page, req.limit, &req.sort, filters.iter().map(|(k, v)| (*k, v.clone())));
        let ttl = ttl::for_search(&req.q, req.has_filters());

        if let Some(hit) = self.cache.get(&cache_key, ttl).await {
            if let Ok(mut response) = serde_json::from_slice::<SearchResponse>(&hit.value) {
                response.cached = true;
                return Ok(response);
            }
            warn!(%cache_key, "cached search payload failed to deserialize, falling through to index");
        }

        let params = translate_search(&req);
        let raw = self.index_search(&params).await?;
        let mut docs: Vec<Value> = raw.docs;
        self.overlay_trending_scores(&mut docs);

        let response = SearchResponse {
            docs,
            total: raw.num_found,
            page: req.page,
            limit: req.limit,
            facets: extract_facets_value(&raw.facets),
            cached: false,
        };

        if let Ok(encoded) = serde_json::to_vec(&response) {
            self.cache.set_fire_and_forget(cache_key, encoded, ttl);
        }

        Ok(response)
    }

    async fn index_search(&self, params: &ParamMap) -> AppResult<crate::index::client::SearchResponse> {
        self.index.search(&self.core, params).await
    }

    /// Crypto documents in the result set get their `trending_score`
    /// overwritten with the live value from the trending engine when one
    /// exists, so a search result always reflects the current rank rather
    /// than the value as of the last index commit.
    fn overlay_trending_scores(&self, docs: &mut [Value]) {
        for doc in docs.iter_mut() {
            let Some(symbol) = doc.get("symbol").and_then(Value::as_str).map(str::to_string) else {
                continue;
            };
            let id = symbol.to_lowercase();
            if let Some(score) = self.trending.score(&id) {
                if let Some(obj) = doc.as_object_mut() {
                    obj.insert("trending_score".to_string(), serde_json::json!(score));
                    obj.insert("is_trending".to_string(), serde_json::json!(score > 50.0));
                }
            }
        }
    }

    pub async fn trending(&self, period: &str, limit: u32) -> AppResult<Vec<crate::models::TrendingRecord>> {
        let cache_key = cache_key::trending_key(period, limit);
        if let Some(hit) = self.cache.get(&cache_key, ttl::trending(period)).await {
            if let Ok(records) = serde_json::from_slice(&hit.value) {
                return Ok(records);
            }
        }
        let records = self.trending.top(limit as usize, period);
        if let Ok(encoded) = serde_json::to_vec(&records) {
            self.cache.set_fire_and_forget(cache_key, encoded, ttl::trending(period));
        }
        Ok(records)
    }

    pub async fn suggest(&self, query: &str, limit: u32) -> AppResult<Vec<String>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let cache_key = cache_key::suggestions_key(query, limit);
        if let Some(hit) = self.cache.get(&cache_key, ttl::SUGGESTIONS).await {
            if let Ok(suggestions) = serde_json::from_slice::<Vec<String>>(&hit.value) {
                return Ok(suggestions);
            }
        }

        let mut suggestions = self.index.suggest(&self.core, query, limit).await?;
        boost_major_assets(&mut suggestions);

        if let Ok(encoded) = serde_json::to_vec(&suggestions) {
            self.cache.set_fire_and_forget(cache_key, encoded, ttl::SUGGESTIONS);
        }
        Ok(suggestions)
    }

    pub async fn get_crypto(&self, id: &str) -> AppResult<Value> {
        let cache_key = cache_key::crypto_key(id);
        if let Some(hit) = self.cache.get(&cache_key, ttl::CRYPTO_BY_ID).await {
            if let Ok(doc) = serde_json::from_slice(&hit.value) {
                return Ok(doc);
            }
        }

        let mut params = ParamMap::new();
        params.set("q", format!("symbol:{id}")).set("rows", "1");
        let raw = self.index_search(&params).await?;
        let doc = raw.docs.into_iter().next().ok_or_else(|| AppError::NotFound(id.to_string()))?;

        if let Ok(encoded) = serde_json::to_vec(&doc) {
            self.cache.set_fire_and_forget(cache_key, encoded, ttl::CRYPTO_BY_ID);
        }
        Ok(doc)
    }

    pub async fn get_order(&self, id: &str) -> AppResult<Value> {
        let mut params = ParamMap::new();
        params.set("q", format!("id:{id}")).set("rows", "1");
        let raw = self.index_search(&params).await?;
        raw.docs.into_iter().next().ok_or_else(|| AppError::NotFound(id.to_string()))
    }

    pub async fn get_filters(&self) -> AppResult<Value> {
        let cache_key = cache_key::filters_key();
        if let Some(hit) = self.cache.get(&cache_key, ttl::FILTERS).await {
            if let Ok(value) = serde_json::from_slice(&hit.value) {
                return Ok(value);
            }
        }

        let mut params = ParamMap::new();
        params.set("q", "*:*").set("rows", "0").set("facet", "true");
        for field in ["status", "order_type", "order_kind", "categories", "tags"] {
            params.push("facet.field", field);
        }
        let raw = self.index_search(&params).await?;
        let value = extract_facets_value(&raw.facets);

        if let Ok(encoded) = serde_json::to_vec(&value) {
            self.cache.set_fire_and_forget(cache_key, encoded, ttl::FILTERS);
        }
        Ok(value)
    }

    pub async fn invalidate(&self, namespace: &str) -> AppResult<()> {
        self.cache.invalidate_pattern(&format!("search-api:{namespace}:")).await;
        Ok(())
    }

    pub async fn clear_cache(&self) -> AppResult<()> {
        self.cache.clear().await;
        Ok(())
    }

    pub async fn cache_stats(&self) -> AppResult<crate::cache::CacheStats> {
        Ok(self.cache.stats().await)
    }

    pub async fn warm_cache(&self) -> AppResult<()> {
        let cancel = tokio_util::sync::CancellationToken::new();
        let mut params = ParamMap::new();
        params.set("q", "*:*").set("rows", "20");
        let raw = self.index_search(&params).await?;
        let response = SearchResponse {
            total: raw.num_found,
            docs: raw.docs,
            page: 1,
            limit: 20,
            facets: extract_facets_value(&raw.facets),
            cached: false,
        };
        let key = cache_key::search_key("", 1, 20, "", std::iter::empty());
        if let Ok(encoded) = serde_json::to_vec(&response) {
            self.cache
                .warm(std::iter::once((key, encoded)), ttl::SEARCH_EMPTY_QUERY, &cancel)
                .await;
        }
        Ok(())
    }

    pub async fn health(&self) -> AppResult<()> {
        self.cache.ping().await.map_err(|e| AppError::Cache(e.to_string()))?;
        self.index.ping(&self.core).await?;
        Ok(())
    }
}

fn collect_filter_pairs(req: &SearchRequest) -> Vec<(&'static str, String)> {
    let mut pairs = Vec::new();
    if let Some(v) = &req.status {
        pairs.push(("status", v.clone()));
    }
    if let Some(v) = &req.order_type {
        pairs.push(("order_type", v.clone()));
    }
    if let Some(v) = &req.order_kind {
        pairs.push(("order_kind", v.clone()));
    }
    if let Some(v) = &req.crypto_symbol {
        pairs.push(("crypto_symbol", v.clone()));
    }
    if !req.categories.is_empty() {
        pairs.push(("categories", req.categories.join(",")));
    }
    if !req.tags.is_empty() {
        pairs.push(("tags", req.tags.join(",")));
    }
    if let Some(v) = req.price_min {
        pairs.push(("price_min", v.to_string()));
    }
    if let Some(v) = req.price_max {
        pairs.push(("price_max", v.to_string()));
    }
    if let Some(v) = req.market_cap_min {
        pairs.push(("market_cap_min", v.to_string()));
    }
    if let Some(v) = req.market_cap_max {
        pairs.push(("market_cap_max", v.to_string()));
    }
    if let Some(v) = &req.date_from {
        pairs.push(("date_from", v.clone()));
    }
    if let Some(v) = &req.date_to {
        pairs.push(("date_to", v.clone()));
    }
    if let Some(v) = &req.user_id {
        pairs.push(("user_id", v.clone()));
    }
    if let Some(v) = req.amount_min {
        pairs.push(("amount_min", v.to_string()));
    }
    if let Some(v) = req.amount_max {
        pairs.push(("amount_max", v.to_string()));
    }
    if let Some(v) = &req.platform {
        pairs.push(("platform", v.clone()));
    }
    if let Some(v) = req.trending {
        pairs.push(("trending", v.to_string()));
    }
    if let Some(v) = req.active {
        pairs.push(("active", v.to_string()));
    }
    if let Some(v) = &req.price_change_24h {
        pairs.push(("price_change_24h", v.clone()));
    }
    pairs
}

fn extract_facets_value(raw: &Value) -> Value {
    serde_json::to_value(extract_facets(raw)).unwrap_or(Value::Null)
}

/// BTC and ETH are boosted to the top of every suggestion list regardless
/// of the index's own relevance ranking, since they are the two assets
/// overwhelmingly most likely to be what the user meant.
fn boost_major_assets(suggestions: &mut Vec<String>) {
    const MAJOR: &[&str] = &["BTC", "ETH"];
    suggestions.sort_by_key(|s| {
        let upper = s.to_uppercase();
        if MAJOR.contains(&upper.as_str()) {
            0
        } else {
            1
        }
    });
}

#[allow(dead_code)]
fn require_index_document(value: &Value) -> AppResult<IndexDocument> {
    serde_json::from_value(value.clone()).map_err(|e| AppError::Validation(e.to_string()))
}
