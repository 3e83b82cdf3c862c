//! HTTP route table: the axum surface the search coordinator is wired
//! behind. Thin handlers only — validation lives on `SearchRequest`,
//! business logic lives in `search::Coordinator`.

use crate::auth::{auth_middleware, AuthState};
use crate::error::AppResult;
use crate::search::{Coordinator, SearchRequest};
use axum::extract::{Path, Query, State};
use axum::middleware as axum_mw;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
    pub auth: AuthState,
}

pub fn router(state: AppState) -> Router {
    let admin_routes = Router::new()
        .route("/cache/invalidate/:namespace", post(invalidate_cache))
        .route("/cache/warm", post(warm_cache))
        .route("/cache/clear", post(clear_cache))
        .route("/cache/stats", get(cache_stats))
        .layer(axum_mw::from_fn_with_state(state.auth.jwt_handler.clone(), auth_middleware));

    Router::new()
        .route("/search", get(search))
        .route("/trending", get(trending))
        .route("/suggest", get(suggest))
        .route("/crypto/:id", get(get_crypto))
        .route("/orders/:id", get(get_order))
        .route("/filters", get(get_filters))
        .route("/health", get(health))
        .merge(admin_routes)
        .with_state(state)
}

fn ok_envelope(data: Value) -> Json<Value> {
    Json(json!({
        "success": true,
        "data": data,
        "meta": { "timestamp": chrono::Utc::now().to_rfc3339() },
    }))
}

async fn search(State(state): State<AppState>, Query(req): Query<SearchRequest>) -> AppResult<Json<Value>> {
    let response = state.coordinator.search(req).await?;
    Ok(ok_envelope(serde_json::to_value(response).unwrap_or(Value::Null)))
}

#[derive(Debug, Deserialize)]
struct TrendingQuery {
    #[serde(default = "default_period")]
    period: String,
    #[serde(default = "default_limit")]
    limit: u32,
}

fn default_period() -> String {
    "24h".to_string()
}

fn default_limit() -> u32 {
    10
}

async fn trending(State(state): State<AppState>, Query(q): Query<TrendingQuery>) -> AppResult<Json<Value>> {
    let records = state.coordinator.trending(&q.period, q.limit).await?;
    Ok(ok_envelope(serde_json::to_value(records).unwrap_or(Value::Null)))
}

#[derive(Debug, Deserialize)]
struct SuggestQuery {
    q: String,
    #[serde(default = "default_limit")]
    limit: u32,
}

async fn suggest(State(state): State<AppState>, Query(q): Query<SuggestQuery>) -> AppResult<Json<Value>> {
    let suggestions = state.coordinator.suggest(&q.q, q.limit).await?;
    Ok(ok_envelope(serde_json::to_value(suggestions).unwrap_or(Value::Null)))
}

async fn get_crypto(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<Json<Value>> {
    let doc = state.coordinator.get_crypto(&id).await?;
    Ok(ok_envelope(doc))
}

async fn get_order(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<Json<Value>> {
    let doc = state.coordinator.get_order(&id).await?;
    Ok(ok_envelope(doc))
}

async fn get_filters(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let filters = state.coordinator.get_filters().await?;
    Ok(ok_envelope(filters))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    match state.coordinator.health().await {
        Ok(()) => Json(json!({ "status": "ok" })),
        Err(err) => Json(json!({ "status": "degraded", "reason": err.to_string() })),
    }
}

async fn invalidate_cache(State(state): State<AppState>, Path(namespace): Path<String>) -> AppResult<Json<Value>> {
    state.coordinator.invalidate(&namespace).await?;
    Ok(ok_envelope(json!({ "invalidated": namespace })))
}

async fn warm_cache(State(state): State<AppState>) -> AppResult<Json<Value>> {
    state.coordinator.warm_cache().await?;
    Ok(ok_envelope(json!({ "warmed": true })))
}

async fn clear_cache(State(state): State<AppState>) -> AppResult<Json<Value>> {
    state.coordinator.clear_cache().await?;
    Ok(ok_envelope(json!({ "cleared": true })))
}

async fn cache_stats(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let stats = state.coordinator.cache_stats().await?;
    Ok(ok_envelope(serde_json::to_value(stats).unwrap_or(Value::Null)))
}
