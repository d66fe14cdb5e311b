//! Retry policy for model calls, with exponential backoff and jitter (§7).
//!
//! Adapted from the teacher SDK's generic `Error`-based retry helper, but
//! narrowed to classify on [`ModelError`] specifically — only
//! `RateLimited`/`Transient` failures are retried, since an `Invalid`
//! request or a `Canceled` call will never succeed by repeating it.

use crate::error::ModelError;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_jitter_factor(mut self, jitter: f64) -> Self {
        self.jitter_factor = jitter.clamp(0.0, 1.0);
        self
    }

    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_delay_ms = self.initial_delay.as_millis() as f64;
        let exponential_delay = base_delay_ms * self.backoff_multiplier.powi(attempt as i32);
        let capped_delay = exponential_delay.min(self.max_delay.as_millis() as f64);
        let jitter_range = capped_delay * self.jitter_factor;
        let jitter = rand::random::<f64>() * jitter_range;
        let final_delay = capped_delay + jitter - (jitter_range / 2.0);
        Duration::from_millis(final_delay.max(0.0) as u64)
    }
}

/// Retries `operation` while it fails with a retryable [`ModelError`]
/// (§8 testable property: "retries are bounded and classify correctly").
/// Returns the last error once `max_attempts` is exhausted, or immediately
/// on the first non-retryable error.
pub async fn retry_model_call<F, Fut, T>(config: &RetryConfig, mut operation: F) -> Result<T, ModelError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ModelError>>,
{
    let mut last_error = None;

    for attempt in 0..config.max_attempts {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(err) => {
                if !err.is_retryable() {
                    return Err(err);
                }
                last_error = Some(err);
                if attempt < config.max_attempts - 1 {
                    let delay = config.calculate_delay(attempt);
                    tracing::warn!(attempt, ?delay, error = %last_error.as_ref().unwrap(), "retrying model call");
                    sleep(delay).await;
                }
            }
        }
    }

    Err(last_error.unwrap_or(ModelError::Transient("retry loop ran zero attempts".to_string())))
}
