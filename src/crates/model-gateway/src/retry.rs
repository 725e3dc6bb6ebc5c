//! Jittered exponential backoff and error classification, shared by the
//! model gateway and search clients.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::GatewayError;

/// Whether an error is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Likely to succeed on a later attempt (timeouts, 5xx, connection
    /// resets, rate limiting).
    Transient,
    /// Will not succeed on retry (bad request, auth failure, not found).
    Permanent,
    /// Unrecognized failure mode; retried conservatively like `Transient`.
    Unknown,
}

/// Backoff schedule: 500ms initial, doubling, capped at 4s, with jitter.
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
            max_retries: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 4_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn with_max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    /// Delay before the given zero-indexed attempt, in milliseconds.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let raw = self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        let capped = raw.min(self.max_backoff_ms as f64);
        let millis = if self.jitter {
            let jitter_factor = 1.0 + rand::random::<f64>() * 0.25;
            capped * jitter_factor
        } else {
            capped
        };
        Duration::from_millis(millis.round() as u64)
    }
}

pub fn classify_error(err: &GatewayError) -> ErrorClass {
    let msg = err.to_string().to_lowercase();
    if msg.contains("rate limit") || msg.contains("429") {
        return ErrorClass::Transient;
    }
    if msg.contains("timeout") || msg.contains("timed out") {
        return ErrorClass::Transient;
    }
    if msg.contains("connection") || msg.contains("network") || msg.contains("dns") {
        return ErrorClass::Transient;
    }
    if msg.contains("500") || msg.contains("502") || msg.contains("503") || msg.contains("504") {
        return ErrorClass::Transient;
    }
    if msg.contains("401") || msg.contains("403") || msg.contains("404") || msg.contains("400") {
        return ErrorClass::Permanent;
    }
    if msg.contains("unauthorized") || msg.contains("forbidden") || msg.contains("not found") {
        return ErrorClass::Permanent;
    }
    ErrorClass::Unknown
}

/// Run `f` up to `config.max_retries + 1` times, sleeping between attempts
/// per the jittered backoff schedule. Aborts immediately on a `Permanent`
/// classification. Returns the last error if every attempt fails.
pub async fn retry_with_backoff<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    mut f: F,
) -> Result<T, GatewayError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GatewayError>>,
{
    let mut last_err = None;
    for attempt in 0..=config.max_retries {
        match f().await {
            Ok(v) => {
                if attempt > 0 {
                    info!(operation = operation_name, attempt, "succeeded after retry");
                }
                return Ok(v);
            }
            Err(e) => {
                let class = classify_error(&e);
                match class {
                    ErrorClass::Permanent => {
                        warn!(operation = operation_name, error = %e, "permanent failure, not retrying");
                        return Err(e);
                    }
                    _ => {
                        debug!(operation = operation_name, attempt, error = %e, "attempt failed");
                        last_err = Some(e);
                        if attempt < config.max_retries {
                            tokio::time::sleep(config.backoff_delay(attempt)).await;
                        }
                    }
                }
            }
        }
    }
    Err(last_err.expect("loop runs at least once"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn default_config_matches_spec() {
        let c = RetryConfig::default();
        assert_eq!(c.max_retries, 3);
        assert_eq!(c.initial_backoff_ms, 500);
        assert_eq!(c.max_backoff_ms, 4_000);
    }

    #[test]
    fn backoff_caps_at_max() {
        let c = RetryConfig::default();
        let delay = c.backoff_delay(10);
        assert!(delay.as_millis() <= 5_000);
    }

    #[test]
    fn classifies_rate_limit_as_transient() {
        let e = GatewayError::Upstream("429 rate limit exceeded".into());
        assert_eq!(classify_error(&e), ErrorClass::Transient);
    }

    #[test]
    fn classifies_auth_as_permanent() {
        let e = GatewayError::Upstream("401 unauthorized".into());
        assert_eq!(classify_error(&e), ErrorClass::Permanent);
    }

    #[tokio::test]
    async fn succeeds_first_try() {
        let config = RetryConfig::default();
        let result = retry_with_backoff(&config, "test", || async { Ok::<_, GatewayError>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let config = RetryConfig::default().with_max_retries(2);
        let attempts = AtomicU32::new(0);
        let result = retry_with_backoff(&config, "test", || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 1 {
                    Err(GatewayError::Upstream("503 unavailable".into()))
                } else {
                    Ok(7)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn aborts_on_permanent() {
        let config = RetryConfig::default();
        let attempts = AtomicU32::new(0);
        let result: Result<(), GatewayError> = retry_with_backoff(&config, "test", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(GatewayError::Upstream("403 forbidden".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_all_attempts() {
        let config = RetryConfig::default().with_max_retries(2);
        let attempts = AtomicU32::new(0);
        let result: Result<(), GatewayError> = retry_with_backoff(&config, "test", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(GatewayError::Upstream("timeout".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
