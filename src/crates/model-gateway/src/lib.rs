//! Client for the upstream model completion gateway: a `ChatModel`-shaped
//! trait, jittered-backoff retry, and fallback-model substitution once the
//! retry budget for the primary model is spent.

pub mod http_client;
pub mod retry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

pub use http_client::HttpModelClient;
pub use retry::RetryConfig;

/// A single completion request sent to a model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub system_prompt: Option<String>,
    pub user_text: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// Token accounting for one completion, either reported verbatim by the
/// provider or estimated as `ceil(chars / 4)` when the provider omits it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub estimated: bool,
}

impl TokenUsage {
    pub fn estimate(system_prompt: Option<&str>, user_text: &str, output_text: &str) -> Self {
        let input_chars = system_prompt.map(str::len).unwrap_or(0) + user_text.len();
        TokenUsage {
            input_tokens: chars_to_tokens(input_chars),
            output_tokens: chars_to_tokens(output_text.len()),
            estimated: true,
        }
    }
}

fn chars_to_tokens(chars: usize) -> u64 {
    ((chars as u64) + 3) / 4
}

/// The result of a completed (possibly streamed) request.
#[derive(Debug, Clone)]
pub struct CompletionOutcome {
    pub text: String,
    pub usage: TokenUsage,
    pub model_used: String,
}

/// Sink for incremental tokens during a streaming completion.
#[async_trait]
pub trait TokenSink: Send + Sync {
    async fn token(&mut self, text: &str);
}

/// No-op sink for callers that only want the final outcome.
pub struct NullSink;

#[async_trait]
impl TokenSink for NullSink {
    async fn token(&mut self, _text: &str) {}
}

#[derive(Debug, Error, Clone)]
pub enum GatewayError {
    #[error("upstream error: {0}")]
    Upstream(String),
    #[error("request timed out")]
    Timeout,
    #[error("no model configured")]
    NoModel,
}

impl GatewayError {
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::Upstream(_) => "gateway-error",
            GatewayError::Timeout => "gateway-timeout",
            GatewayError::NoModel => "gateway-misconfigured",
        }
    }
}

/// Implemented by any backend capable of serving completions: the default
/// HTTP adapter, or a test double.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(&self, req: &CompletionRequest) -> Result<CompletionOutcome, GatewayError>;

    async fn stream(
        &self,
        req: &CompletionRequest,
        sink: &mut dyn TokenSink,
    ) -> Result<CompletionOutcome, GatewayError>;

    fn clone_box(&self) -> Box<dyn ModelClient>;
}

impl Clone for Box<dyn ModelClient> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Wraps a primary `ModelClient`, retrying with jittered backoff, and
/// falling over to a fallback model after three consecutive failures on
/// the primary.
pub struct Gateway {
    primary: Arc<dyn ModelClient>,
    fallback: Option<(String, Arc<dyn ModelClient>)>,
    retry: RetryConfig,
}

impl Gateway {
    pub fn new(primary: Arc<dyn ModelClient>) -> Self {
        Gateway {
            primary,
            fallback: None,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_fallback(mut self, model: impl Into<String>, client: Arc<dyn ModelClient>) -> Self {
        self.fallback = Some((model.into(), client));
        self
    }

    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry = config;
        self
    }

    pub async fn complete(&self, req: &CompletionRequest) -> Result<CompletionOutcome, GatewayError> {
        let primary_result = retry::retry_with_backoff(&self.retry, "model-gateway.complete", || {
            self.primary.complete(req)
        })
        .await;

        match (primary_result, &self.fallback) {
            (Ok(outcome), _) => Ok(outcome),
            (Err(e), Some((fallback_model, client))) => {
                tracing::warn!(
                    error = %e,
                    fallback_model,
                    "primary model exhausted retries, switching to fallback"
                );
                let mut fallback_req = req.clone();
                fallback_req.model = fallback_model.clone();
                retry::retry_with_backoff(&self.retry, "model-gateway.complete.fallback", || {
                    client.complete(&fallback_req)
                })
                .await
            }
            (Err(e), None) => Err(e),
        }
    }

    pub async fn stream(
        &self,
        req: &CompletionRequest,
        sink: &mut dyn TokenSink,
    ) -> Result<CompletionOutcome, GatewayError> {
        // Streaming attempts are not retried mid-stream (partial tokens
        // would be duplicated); only the initial connection failure path
        // falls back, mirroring `complete`'s single-shot retry budget.
        match self.primary.stream(req, sink).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                if let Some((fallback_model, client)) = &self.fallback {
                    tracing::warn!(error = %e, fallback_model, "primary stream failed, switching to fallback");
                    let mut fallback_req = req.clone();
                    fallback_req.model = fallback_model.clone();
                    client.stream(&fallback_req, sink).await
                } else {
                    Err(e)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyClient {
        fail_times: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ModelClient for FlakyClient {
        async fn complete(&self, req: &CompletionRequest) -> Result<CompletionOutcome, GatewayError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_times {
                Err(GatewayError::Upstream("503 unavailable".into()))
            } else {
                Ok(CompletionOutcome {
                    text: "ok".into(),
                    usage: TokenUsage::estimate(req.system_prompt.as_deref(), &req.user_text, "ok"),
                    model_used: req.model.clone(),
                })
            }
        }

        async fn stream(
            &self,
            req: &CompletionRequest,
            _sink: &mut dyn TokenSink,
        ) -> Result<CompletionOutcome, GatewayError> {
            self.complete(req).await
        }

        fn clone_box(&self) -> Box<dyn ModelClient> {
            unimplemented!("not needed in tests")
        }
    }

    fn req() -> CompletionRequest {
        CompletionRequest {
            model: "primary".into(),
            system_prompt: Some("be helpful".into()),
            user_text: "hello".into(),
            temperature: None,
            max_tokens: None,
        }
    }

    #[test]
    fn usage_estimate_uses_ceil_chars_over_4() {
        let u = TokenUsage::estimate(Some("abcd"), "abcdefgh", "abcd");
        assert_eq!(u.input_tokens, 3);
        assert_eq!(u.output_tokens, 1);
        assert!(u.estimated);
    }

    #[tokio::test]
    async fn falls_back_after_retry_budget_spent() {
        let primary = Arc::new(FlakyClient {
            fail_times: 100,
            calls: AtomicU32::new(0),
        });
        let fallback = Arc::new(FlakyClient {
            fail_times: 0,
            calls: AtomicU32::new(0),
        });
        let gateway = Gateway::new(primary).with_fallback("backup-model", fallback);
        let outcome = gateway.complete(&req()).await.unwrap();
        assert_eq!(outcome.model_used, "backup-model");
    }

    #[tokio::test]
    async fn succeeds_on_primary_without_fallback() {
        let primary = Arc::new(FlakyClient {
            fail_times: 1,
            calls: AtomicU32::new(0),
        });
        let gateway = Gateway::new(primary);
        let outcome = gateway.complete(&req()).await.unwrap();
        assert_eq!(outcome.model_used, "primary");
    }
}
