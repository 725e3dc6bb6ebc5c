//! Client for the upstream web search provider. Same retry shape as
//! `model-gateway`, scaled down to the two-retry budget the search path
//! gets: a transient failure costs less to retry than a full model call.

mod retry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use retry::RetryConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    pub max_results: Option<u32>,
}

/// A single search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

#[derive(Debug, Error, Clone)]
pub enum SearchError {
    #[error("upstream search error: {0}")]
    Upstream(String),
    #[error("search request timed out")]
    Timeout,
}

impl SearchError {
    pub fn kind(&self) -> &'static str {
        match self {
            SearchError::Upstream(_) => "search-error",
            SearchError::Timeout => "search-timeout",
        }
    }
}

#[async_trait]
pub trait SearchClient: Send + Sync {
    async fn search(&self, req: &SearchRequest) -> Result<Vec<SearchResult>, SearchError>;
}

/// Default HTTP adapter. Empty result sets are not an error: they format
/// as an empty string for the calling operator, not a failure.
pub struct HttpSearchClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
    retry: RetryConfig,
}

impl HttpSearchClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        HttpSearchClient {
            base_url: base_url.into(),
            api_key: api_key.into(),
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .expect("building reqwest client"),
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Deserialize)]
struct RawResponse {
    #[serde(default)]
    results: Vec<RawResult>,
}

#[derive(Deserialize)]
struct RawResult {
    title: String,
    url: String,
    #[serde(default)]
    snippet: String,
}

#[async_trait]
impl SearchClient for HttpSearchClient {
    async fn search(&self, req: &SearchRequest) -> Result<Vec<SearchResult>, SearchError> {
        retry::retry_with_backoff(&self.retry, "search-client.search", || async {
            let response = self
                .client
                .get(format!("{}/search", self.base_url))
                .bearer_auth(&self.api_key)
                .query(&[("q", req.query.as_str())])
                .send()
                .await
                .map_err(|e| {
                    if e.is_timeout() {
                        SearchError::Timeout
                    } else {
                        SearchError::Upstream(e.to_string())
                    }
                })?;

            let status = response.status();
            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                return Err(SearchError::Upstream(format!("{status}: {text}")));
            }

            let parsed: RawResponse = response
                .json()
                .await
                .map_err(|e| SearchError::Upstream(format!("malformed response body: {e}")))?;

            let mut results: Vec<SearchResult> = parsed
                .results
                .into_iter()
                .map(|r| SearchResult {
                    title: r.title,
                    url: r.url,
                    snippet: r.snippet,
                })
                .collect();

            if let Some(max) = req.max_results {
                results.truncate(max as usize);
            }
            Ok(results)
        })
        .await
    }
}

/// Renders results as LLM-consumable text; an empty result set renders as
/// an empty string rather than an error or placeholder.
pub fn format_results(results: &[SearchResult]) -> String {
    results
        .iter()
        .map(|r| format!("{}\n{}\n{}", r.title, r.url, r.snippet))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_results_empty_is_empty_string() {
        assert_eq!(format_results(&[]), "");
    }

    #[test]
    fn format_results_joins_with_blank_line() {
        let results = vec![
            SearchResult {
                title: "A".into(),
                url: "http://a".into(),
                snippet: "a snippet".into(),
            },
            SearchResult {
                title: "B".into(),
                url: "http://b".into(),
                snippet: "b snippet".into(),
            },
        ];
        let rendered = format_results(&results);
        assert!(rendered.contains("A\nhttp://a\na snippet"));
        assert!(rendered.contains("\n\n"));
    }
}
