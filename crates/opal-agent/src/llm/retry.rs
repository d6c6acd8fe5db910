//! Retry policy for transient LLM failures.
//!
//! Provider 5xx responses, 429s, and transport errors get a small number of
//! retries (default: one) with jittered exponential backoff.  Everything
//! else — parse errors, auth failures, 4xx — surfaces immediately.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::Result;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries after the initial attempt.
    pub max_retries: u32,

    /// Delay before the first retry.
    pub initial_delay: Duration,

    /// Multiplier applied to the delay after each retry.
    pub backoff_factor: f64,

    /// Cap on the delay between retries.
    pub max_delay: Duration,

    /// Random jitter as a fraction of the delay (0.0 to 1.0).
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 1,
            initial_delay: Duration::from_millis(500),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(10),
            jitter_factor: 0.1,
        }
    }
}

impl RetryConfig {
    /// The backoff delay for a given retry attempt (0-based), jittered.
    fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_millis() as f64
            * self.backoff_factor.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_millis() as f64);

        let jitter_range = capped * self.jitter_factor;
        let jitter = rand::random::<f64>() * jitter_range - jitter_range / 2.0;

        Duration::from_millis((capped + jitter).max(0.0) as u64)
    }
}

/// Run `op`, retrying transient failures per `config`.
///
/// Returns the first success, or the last error once retries are exhausted
/// or a non-transient error occurs.
pub async fn retry_transient<T, F, Fut>(config: &RetryConfig, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < config.max_retries => {
                let delay = config.delay_for(attempt);
                warn!(
                    error = %e,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "transient llm failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
