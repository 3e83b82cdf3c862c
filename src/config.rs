//! Process configuration, loaded from environment variables.
//!
//! `env::var(...).unwrap_or_else(...).parse().unwrap_or(default)` for
//! every setting, with `clap` flags layered on top for the handful of
//! values worth overriding at the command line.

use std::time::Duration;

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub environment: String,

    pub index_base_url: String,
    pub index_core: String,
    pub index_timeout: Duration,
    pub index_max_retries: u32,
    pub index_retry_delay: Duration,
    pub index_max_idle_conns: usize,
    pub index_max_conns_per_host: usize,

    pub cache_local_max_items: u64,
    pub cache_local_items_to_prune: u64,
    pub distributed_cache_url: String,

    pub broker_url: String,
    pub broker_exchange: String,
    pub broker_queue: String,
    pub broker_routing_keys: Vec<String>,
    pub broker_dlq_enabled: bool,
    pub consumer_worker_count: usize,
    pub consumer_prefetch: u16,
    pub consumer_max_retries: u32,

    pub orders_service_base_url: String,
    pub orders_service_api_key: String,
    pub orders_service_timeout: Duration,

    pub trending_update_interval: Duration,
    pub trending_score_decay_rate: f64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let port = env_parse("PORT", 8080u16);
        let environment = env_string("APP_ENV", "development");

        let index_base_url = env_string("INDEX_BASE_URL", "http://localhost:8983/solr");
        let index_core = env_string("INDEX_CORE", "crypto_search");
        let index_timeout = Duration::from_secs(env_parse("INDEX_TIMEOUT_SECS", 10u64));
        let index_max_retries = env_parse("INDEX_MAX_RETRIES", 3u32);
        let index_retry_delay = Duration::from_millis(env_parse("INDEX_RETRY_DELAY_MS", 200u64));
        let index_max_idle_conns = env_parse("INDEX_MAX_IDLE_CONNS", 32usize);
        let index_max_conns_per_host = env_parse("INDEX_MAX_CONNS_PER_HOST", 16usize);

        let cache_local_max_items = env_parse("CACHE_LOCAL_MAX_ITEMS", 10_000u64);
        let cache_local_items_to_prune = env_parse("CACHE_LOCAL_ITEMS_TO_PRUNE", 100u64);
        let distributed_cache_url = env_string("DISTRIBUTED_CACHE_URL", "redis://127.0.0.1:6379");

        let broker_url = env_string("BROKER_URL", "amqp://127.0.0.1:5672/%2f");
        let broker_exchange = env_string("BROKER_EXCHANGE", "crypto.events");
        let broker_queue = env_string("BROKER_QUEUE", "search-indexer");
        let broker_routing_keys = env_string("BROKER_ROUTING_KEYS", "orders.#,market.#,search.#")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        let broker_dlq_enabled = env_bool("BROKER_DLQ_ENABLED", true);
        let consumer_worker_count = env_parse("CONSUMER_WORKER_COUNT", 5usize);
        let consumer_prefetch = env_parse("CONSUMER_PREFETCH", 10u16);
        let consumer_max_retries = env_parse("CONSUMER_MAX_RETRIES", 3u32);

        let orders_service_base_url =
            env_string("ORDERS_SERVICE_BASE_URL", "http://orders-service.internal");
        let orders_service_api_key = env_string("ORDERS_SERVICE_API_KEY", "");
        let orders_service_timeout =
            Duration::from_secs(env_parse("ORDERS_SERVICE_TIMEOUT_SECS", 10u64));

        let trending_update_interval =
            Duration::from_secs(env_parse("TRENDING_UPDATE_INTERVAL_SECS", 300u64));
        let trending_score_decay_rate = env_parse("TRENDING_SCORE_DECAY_RATE", 0.95f64);

        Ok(Self {
            port,
            environment,
            index_base_url,
            index_core,
            index_timeout,
            index_max_retries,
            index_retry_delay,
            index_max_idle_conns,
            index_max_conns_per_host,
            cache_local_max_items,
            cache_local_items_to_prune,
            distributed_cache_url,
            broker_url,
            broker_exchange,
            broker_queue,
            broker_routing_keys,
            broker_dlq_enabled,
            consumer_worker_count,
            consumer_prefetch,
            consumer_max_retries,
            orders_service_base_url,
            orders_service_api_key,
            orders_service_timeout,
            trending_update_interval,
            trending_score_decay_rate,
        })
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON"))
        .unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

/// CLI overrides layered on top of the environment, mirroring the
/// teacher's existing `clap` dependency (used by its own bins).
#[derive(Debug, clap::Parser)]
#[command(name = "search-trending-service", about = "Search & trending service")]
pub struct Cli {
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    #[arg(long, env = "INDEX_BASE_URL")]
    pub index_base_url: Option<String>,
}

impl Cli {
    pub fn apply(self, config: &mut Config) {
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(url) = self.index_base_url {
            config.index_base_url = url;
        }
    }
}
