//! Search & trending service entry point.
//!
//! Builds the cache, index client, trending engine, and event consumer,
//! wires them into the coordinator, starts the background subsystems,
//! and serves the HTTP surface until a shutdown signal arrives.

use anyhow::{Context, Result};
use axum::middleware as axum_mw;
use betterbot_backend::auth::{AuthState, JwtHandler, UserStore};
use betterbot_backend::cache::{CacheManager, InMemoryDistributedCache, RedisDistributedCache};
use betterbot_backend::events::consumer::{Consumer, ConsumerConfig};
use betterbot_backend::events::dispatch::Dispatcher;
use betterbot_backend::http::{self, AppState};
use betterbot_backend::index::client::IndexClient;
use betterbot_backend::lifecycle::{wait_for_shutdown_signal, Services};
use betterbot_backend::middleware::{RateLimitConfig, RateLimitLayer};
use betterbot_backend::search::Coordinator;
use betterbot_backend::sync::{OrderEventHandler, SyncConfig, Synchroniser};
use betterbot_backend::trending::{Engine as TrendingEngine, EngineConfig};
use betterbot_backend::Config;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::{env, net::SocketAddr};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing();

    info!("search & trending service starting");

    let config = Config::from_env().context("failed to load configuration")?;

    let index: Arc<dyn betterbot_backend::index::IndexGateway> = Arc::new(IndexClient::new(
        config.index_base_url.clone(),
        config.index_timeout,
        config.index_max_retries,
        config.index_retry_delay,
    ));

    let distributed = build_distributed_cache(&config.distributed_cache_url).await;
    let cache = Arc::new(CacheManager::new(
        config.cache_local_max_items as usize,
        config.cache_local_items_to_prune as usize,
        distributed,
    ));

    let trending_config = EngineConfig {
        update_interval: config.trending_update_interval,
        score_decay_rate: config.trending_score_decay_rate,
        ..EngineConfig::default()
    };
    let trending = Arc::new(
        TrendingEngine::new(trending_config).with_write_back(Arc::clone(&index), config.index_core.clone()),
    );

    let coordinator = Arc::new(Coordinator::new(
        Arc::clone(&cache),
        Arc::clone(&index),
        Arc::clone(&trending),
        config.index_core.clone(),
    ));

    let synchroniser = Arc::new(Synchroniser::new(
        Arc::clone(&index),
        SyncConfig {
            orders_base_url: config.orders_service_base_url.clone(),
            api_key: config.orders_service_api_key.clone(),
            timeout: config.orders_service_timeout,
            core: config.index_core.clone(),
        },
    ));

    let mut dispatcher = Dispatcher::new();
    let order_handler = Arc::new(
        OrderEventHandler::new(Arc::clone(&synchroniser)).with_trending(Arc::clone(&trending)),
    );
    for event_type in ["orders.created", "orders.updated", "orders.executed", "orders.cancelled", "orders.failed"] {
        dispatcher.register(event_type, Arc::clone(&order_handler) as Arc<dyn betterbot_backend::events::EventHandler>);
    }

    let market_handler = Arc::new(betterbot_backend::trending::MarketEventHandler::new(Arc::clone(&trending)));
    for event_type in ["market.price_change", "market.volume_change", "search.query"] {
        dispatcher.register(event_type, Arc::clone(&market_handler) as Arc<dyn betterbot_backend::events::EventHandler>);
    }

    let consumer = Arc::new(Consumer::new(
        ConsumerConfig {
            amqp_url: config.broker_url.clone(),
            exchange: config.broker_exchange.clone(),
            queue: config.broker_queue.clone(),
            routing_keys: config.broker_routing_keys.clone(),
            dlq_enabled: config.broker_dlq_enabled,
            worker_count: config.consumer_worker_count,
            prefetch: config.consumer_prefetch,
            max_retries: config.consumer_max_retries,
        },
        Arc::new(dispatcher),
    ));

    let auth_db_path = resolve_data_path(env::var("AUTH_DB_PATH").ok(), "search_trending_auth.db");
    let jwt_secret = env::var("JWT_SECRET")
        .unwrap_or_else(|_| "dev-secret-change-in-production-minimum-32-characters".to_string());
    let http_client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()
        .context("failed to build HTTP client")?;
    let user_store = Arc::new(UserStore::new(&auth_db_path)?);
    let jwt_handler = Arc::new(JwtHandler::new(jwt_secret));
    let auth_state = AuthState::new(user_store, jwt_handler, http_client);
    info!(path = %auth_db_path, "authentication store initialized");

    let (shutdown_tx, _shutdown_rx) = watch::channel(false);
    let services = Arc::new(Services::new(
        Arc::clone(&coordinator),
        Arc::clone(&cache),
        Arc::clone(&trending),
        Arc::clone(&consumer),
        CancellationToken::new(),
        shutdown_tx,
    ));
    services.start(&config);

    let app_state = AppState { coordinator, auth: auth_state };
    let rate_limiter = RateLimitLayer::new(RateLimitConfig::default());
    let app = http::router(app_state).layer(axum_mw::from_fn_with_state(rate_limiter, betterbot_backend::middleware::rate_limit::rate_limit_middleware)).layer(CorsLayer::permissive());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await.context("failed to bind listener")?;
    info!(%addr, "listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_then_drain(Arc::clone(&services)))
        .await
        .context("server error")?;

    Ok(())
}

async fn shutdown_then_drain(services: Arc<Services>) {
    wait_for_shutdown_signal().await;
    services.shutdown().await;
}

async fn build_distributed_cache(url: &str) -> Arc<dyn betterbot_backend::cache::DistributedCache> {
    match RedisDistributedCache::connect(url).await {
        Ok(redis) => {
            info!("connected to distributed cache");
            Arc::new(redis)
        }
        Err(err) => {
            tracing::warn!(error = %err, "distributed cache unreachable, falling back to in-memory tier");
            Arc::new(InMemoryDistributedCache::new())
        }
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "betterbot_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn default_data_path(filename: &str) -> String {
    let base = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    base.join(filename).to_string_lossy().to_string()
}

fn resolve_data_path(env_value: Option<String>, default_filename: &str) -> String {
    let base = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let Some(raw) = env_value.filter(|v| !v.trim().is_empty()) else {
        return default_data_path(default_filename);
    };

    let p = PathBuf::from(raw);
    if p.is_absolute() {
        return p.to_string_lossy().to_string();
    }

    base.join(p).to_string_lossy().to_string()
}

fn load_env() {
    let _ = dotenv::dotenv();

    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    let candidates = [manifest_dir.join(".env"), manifest_dir.join("../.env")];
    for p in candidates {
        if p.exists() {
            let _ = dotenv::from_path(&p);
        }
    }
}
