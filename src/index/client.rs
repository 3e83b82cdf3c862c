//! HTTP client for the external index, with linear-backoff retry grounded
//! in the same pattern the whale-tracking scraper uses against upstream
//! rate limits: retry on network errors and 5xx, bail immediately on
//! anything that looks like a client mistake.

use crate::error::{AppError, AppResult};
use crate::index::params::ParamMap;
use crate::models::IndexDocument;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

#[async_trait]
pub trait IndexGateway: Send + Sync {
    async fn search(&self, core: &str, params: &ParamMap) -> AppResult<SearchResponse>;
    async fn update(&self, core: &str, documents: &[IndexDocument]) -> AppResult<()>;
    async fn delete(&self, core: &str, id: &str) -> AppResult<()>;
    async fn delete_by_query(&self, core: &str, query: &str) -> AppResult<()>;
    async fn commit(&self, core: &str) -> AppResult<()>;
    async fn optimize(&self, core: &str) -> AppResult<()>;
    async fn ping(&self, core: &str) -> AppResult<()>;
    async fn document_count(&self, core: &str) -> AppResult<u64>;
    async fn suggest(&self, core: &str, query: &str, limit: u32) -> AppResult<Vec<String>>;
    /// Atomic partial update of a crypto document's trending fields,
    /// used by the trending engine's write-back path so a score refresh
    /// never has to round-trip the full document.
    async fn update_trending_score(&self, core: &str, id: &str, score: f64) -> AppResult<()>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchResponse {
    #[serde(rename = "numFound")]
    pub num_found: u64,
    pub docs: Vec<Value>,
    #[serde(default)]
    pub facets: Value,
    #[serde(default)]
    pub highlighting: Value,
}

pub struct IndexClient {
    http: Client,
    base_url: String,
    max_retries: u32,
    retry_delay: Duration,
}

impl IndexClient {
    pub fn new(base_url: String, timeout: Duration, max_retries: u32, retry_delay: Duration) -> Self {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            max_retries: max_retries.max(1),
            retry_delay,
        }
    }

    fn url(&self, core: &str, path: &str) -> String {
        format!("{}/{core}/{path}", self.base_url)
    }

    /// Retries network errors and 5xx with linear backoff; 4xx (other than
    /// 429) is treated as non-retryable since retrying a malformed request
    /// just wastes the budget.
    async fn execute_with_retry(
        &self,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> AppResult<reqwest::Response> {
        let mut delay = self.retry_delay;
        let mut last_err: Option<String> = None;

        for attempt in 0..self.max_retries {
            match build().send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }
                    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                        let body = response.text().await.unwrap_or_default();
                        warn!(%status, attempt, "index request failed, will retry");
                        last_err = Some(format!("{status}: {body}"));
                    } else {
                        let body = response.text().await.unwrap_or_default();
                        return Err(AppError::IndexUnavailable(format!(
                            "non-retryable index response {status}: {body}"
                        )));
                    }
                }
                Err(err) => {
                    warn!(attempt, error = %err, "index request transport error, will retry");
                    last_err = Some(err.to_string());
                }
            }

            if attempt + 1 < self.max_retries {
                sleep(delay).await;
                delay += self.retry_delay;
            }
        }

        Err(AppError::IndexUnavailable(format!(
            "index unreachable after {} attempts: {}",
            self.max_retries,
            last_err.unwrap_or_default()
        )))
    }
}

#[async_trait]
impl IndexGateway for IndexClient {
    async fn search(&self, core: &str, params: &ParamMap) -> AppResult<SearchResponse> {
        let url = self.url(core, "select");
        let pairs = params.to_pairs();
        let response = self
            .execute_with_retry(|| self.http.get(&url).query(&pairs))
            .await?;
        response
            .json::<SearchResponse>()
            .await
            .map_err(|e| AppError::IndexUnavailable(format!("malformed search response: {e}")))
    }

    async fn update(&self, core: &str, documents: &[IndexDocument]) -> AppResult<()> {
        let url = self.url(core, "update");
        let body = documents.to_vec();
        self.execute_with_retry(|| self.http.post(&url).json(&body))
            .await?;
        debug!(core, count = documents.len(), "updated index documents");
        Ok(())
    }

    async fn delete(&self, core: &str, id: &str) -> AppResult<()> {
        let url = self.url(core, "update");
        let body = serde_json::json!({ "delete": { "id": id } });
        self.execute_with_retry(|| self.http.post(&url).json(&body))
            .await?;
        Ok(())
    }

    async fn delete_by_query(&self, core: &str, query: &str) -> AppResult<()> {
        let url = self.url(core, "update");
        let body = serde_json::json!({ "delete": { "query": query } });
        self.execute_with_retry(|| self.http.post(&url).json(&body))
            .await?;
        Ok(())
    }

    async fn commit(&self, core: &str) -> AppResult<()> {
        let url = self.url(core, "update");
        let body = serde_json::json!({ "commit": {} });
        self.execute_with_retry(|| self.http.post(&url).json(&body))
            .await?;
        Ok(())
    }

    async fn optimize(&self, core: &str) -> AppResult<()> {
        let url = self.url(core, "update");
        let body = serde_json::json!({ "optimize": {} });
        self.execute_with_retry(|| self.http.post(&url).json(&body))
            .await?;
        Ok(())
    }

    async fn ping(&self, core: &str) -> AppResult<()> {
        let url = self.url(core, "admin/ping");
        self.execute_with_retry(|| self.http.get(&url)).await?;
        Ok(())
    }

    async fn document_count(&self, core: &str) -> AppResult<u64> {
        let mut params = ParamMap::new();
        params.set("q", "*:*").set("rows", "0");
        let response = self.search(core, &params).await?;
        Ok(response.num_found)
    }

    async fn suggest(&self, core: &str, query: &str, limit: u32) -> AppResult<Vec<String>> {
        let url = self.url(core, "suggest");
        let pairs = vec![
            ("suggest.q".to_string(), query.to_string()),
            ("suggest.count".to_string(), limit.to_string()),
        ];
        let response = self
            .execute_with_retry(|| self.http.get(&url).query(&pairs))
            .await?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| AppError::IndexUnavailable(format!("malformed suggest response: {e}")))?;
        let suggestions = body
            .pointer("/suggest/suggestions")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        Ok(suggestions)
    }

    /// `{id, trending_score:{set:v}, is_trending:{set:v>50}, last_updated:{set:now}}`
    /// followed by a commit, per the atomic-field-update contract.
    async fn update_trending_score(&self, core: &str, id: &str, score: f64) -> AppResult<()> {
        let url = self.url(core, "update");
        let body = serde_json::json!({
            "id": id,
            "trending_score": { "set": score },
            "is_trending": { "set": score > 50.0 },
            "last_updated": { "set": chrono::Utc::now() },
        });
        self.execute_with_retry(|| self.http.post(&url).json(&body))
            .await?;
        self.commit(core).await?;
        Ok(())
    }
}
