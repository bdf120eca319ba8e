//! Retry with exponential backoff for generative backend calls.
//!
//! Retries `RateLimited` and `Transient` failures. `Rejected` and `Malformed`
//! fail immediately. A provider-supplied `Retry-After` replaces the computed
//! backoff for that attempt.

use quibble_core::config::LlmConfig;
use quibble_core::{BackendError, GenerationError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Initial delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any single wait, including `Retry-After`.
    pub max_delay: Duration,
    /// Multiplier for each subsequent delay.
    pub backoff_factor: f64,
    /// Random extra wait in `[0, jitter]` added to computed delays.
    pub jitter: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            jitter: Duration::from_millis(500),
        }
    }
}

impl RetryConfig {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: Duration::from_millis(config.initial_backoff_ms),
            max_delay: Duration::from_millis(config.max_backoff_ms),
            ..Default::default()
        }
    }

    /// No waiting at all; for tests and the mock provider.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_factor: 1.0,
            jitter: Duration::ZERO,
        }
    }

    fn next_wait(&self, backoff: Duration, error: &BackendError) -> Duration {
        let wait = match error.retry_after() {
            Some(hint) => hint,
            None => backoff + jitter(self.jitter),
        };
        wait.min(self.max_delay)
    }
}

fn jitter(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}

/// Run `operation` until it succeeds, fails permanently, or the attempt
/// budget is spent.
pub async fn with_retry<T, F, Fut>(
    config: &RetryConfig,
    provider_name: &str,
    mut operation: F,
) -> Result<T, GenerationError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BackendError>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut backoff = config.initial_delay;
    let mut attempt = 0;

    loop {
        attempt += 1;
        let error = match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!("{} succeeded on attempt {}", provider_name, attempt);
                }
                return Ok(value);
            }
            Err(e) if !e.is_retryable() => {
                tracing::warn!("{} failed permanently: {}", provider_name, e);
                return Err(GenerationError::NotRetryable(e));
            }
            Err(e) => e,
        };

        tracing::warn!(
            "{} attempt {}/{} failed: {}",
            provider_name,
            attempt,
            max_attempts,
            error
        );

        if attempt == max_attempts {
            return Err(GenerationError::Exhausted {
                attempts: max_attempts,
                last: error,
            });
        }

        let wait = config.next_wait(backoff, &error);
        tracing::info!(
            "{} retrying in {:.1}s (attempt {}/{})",
            provider_name,
            wait.as_secs_f64(),
            attempt + 1,
            max_attempts
        );
        tokio::time::sleep(wait).await;

        backoff = Duration::from_secs_f64(
            (backoff.as_secs_f64() * config.backoff_factor).min(config.max_delay.as_secs_f64()),
        );
    }
}
