//! Retry policies with exponential backoff and jitter for transient
//! failures when calling remote model APIs.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (0 = no retries, just the initial attempt)
    pub max_attempts: u32,
    /// Initial delay before first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Backoff multiplier (e.g., 2.0 for exponential backoff)
    pub backoff_multiplier: f64,
    /// Random jitter fraction to prevent thundering herd (0.0 - 1.0)
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Load a retry policy from `{PREFIX}_*` environment variables, falling
    /// back to the defaults for anything unset.
    pub fn from_env_with_prefix(prefix: &str) -> Self {
        let defaults = Self::default();

        let read = |suffix: &str| std::env::var(format!("{prefix}_{suffix}")).ok();

        Self {
            max_attempts: read("MAX_ATTEMPTS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_attempts),
            initial_delay: read("INITIAL_DELAY_MS")
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.initial_delay),
            max_delay: read("MAX_DELAY_MS")
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_delay),
            backoff_multiplier: read("BACKOFF_MULTIPLIER")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.backoff_multiplier),
            jitter_factor: read("JITTER_FACTOR")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.jitter_factor),
        }
    }

    /// Calculate delay for a given attempt number (1-indexed; attempt 0 is
    /// the initial try and has no delay).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base = self.initial_delay.as_millis() as f64
            * self.backoff_multiplier.powi(attempt as i32 - 1);
        let capped = base.min(self.max_delay.as_millis() as f64);

        let jitter = if self.jitter_factor > 0.0 {
            let range = capped * self.jitter_factor;
            (rand::random::<f64>() - 0.5) * 2.0 * range
        } else {
            0.0
        };

        Duration::from_millis((capped + jitter).max(0.0) as u64)
    }
}

/// Trait to determine if an error is worth retrying.
pub trait RetryableError {
    fn is_retryable(&self) -> bool;
}

impl RetryableError for anyhow::Error {
    fn is_retryable(&self) -> bool {
        let message = self.to_string().to_lowercase();

        const TRANSIENT_PATTERNS: &[&str] = &[
            "timeout",
            "timed out",
            "connection refused",
            "connection reset",
            "temporarily unavailable",
            "service unavailable",
            "too many requests",
            "502",
            "503",
            "504",
            "429",
            "broken pipe",
        ];

        TRANSIENT_PATTERNS
            .iter()
            .any(|pattern| message.contains(pattern))
    }
}

/// Execute an async operation with the given retry policy. Non-retryable
/// errors fail immediately; retryable ones back off until the attempt
/// budget is spent.
pub async fn retry_with_policy<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display + RetryableError,
{
    let max_attempts = policy.max_attempts + 1;
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(
                        operation = operation_name,
                        attempt, "operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(e) => {
                if e.is_retryable() && attempt < max_attempts {
                    let delay = policy.delay_for_attempt(attempt);
                    warn!(
                        operation = operation_name,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient error, retrying after delay"
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }

                if !e.is_retryable() {
                    debug!(
                        operation = operation_name,
                        attempt,
                        error = %e,
                        "non-retryable error, failing immediately"
                    );
                } else {
                    warn!(
                        operation = operation_name,
                        attempt,
                        error = %e,
                        "retry attempts exhausted"
                    );
                }
                return Err(e);
            }
        }
    }
}

/// Retry policy for remote model API calls (embed / rerank / complete).
pub fn remote_api_retry_policy() -> RetryPolicy {
    RetryPolicy::from_env_with_prefix("REMOTE_API_RETRY")
}
