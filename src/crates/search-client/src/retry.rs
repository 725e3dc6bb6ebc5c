//! Same jittered-backoff shape as `model-gateway::retry`, with a two-retry
//! budget instead of three.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::SearchError;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_retries: 2,
            initial_backoff_ms: 500,
            max_backoff_ms: 4_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let raw = self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        let capped = raw.min(self.max_backoff_ms as f64);
        let millis = if self.jitter {
            capped * (1.0 + rand::random::<f64>() * 0.25)
        } else {
            capped
        };
        Duration::from_millis(millis.round() as u64)
    }
}

fn is_permanent(err: &SearchError) -> bool {
    let msg = err.to_string().to_lowercase();
    msg.contains("401") || msg.contains("403") || msg.contains("404") || msg.contains("400")
}

pub async fn retry_with_backoff<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    mut f: F,
) -> Result<T, SearchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SearchError>>,
{
    let mut last_err = None;
    for attempt in 0..=config.max_retries {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                if is_permanent(&e) {
                    warn!(operation = operation_name, error = %e, "permanent failure, not retrying");
                    return Err(e);
                }
                debug!(operation = operation_name, attempt, error = %e, "attempt failed");
                last_err = Some(e);
                if attempt < config.max_retries {
                    tokio::time::sleep(config.backoff_delay(attempt)).await;
                }
            }
        }
    }
    Err(last_err.expect("loop runs at least once"))
}
