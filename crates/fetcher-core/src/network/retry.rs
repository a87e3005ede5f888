//! Retry with exponential backoff and jitter.
//!
//! Catalog calls are retried while the failure is transient. Attempts are
//! unbounded by default: a rate-limited or flapping catalog is waited out
//! rather than turned into a per-item failure.

use crate::config::NetworkConfig;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Backoff policy for transient failures.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts including the first; `None` retries forever.
    pub max_attempts: Option<u32>,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
    /// Multiply each delay by a random factor in `0.5..1.5`.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl RetryConfig {
    /// Retry transient failures until they stop.
    pub fn unbounded() -> Self {
        Self {
            max_attempts: None,
            base_delay: NetworkConfig::RETRY_BASE_DELAY,
            max_delay: NetworkConfig::RETRY_MAX_DELAY,
            exponential_base: 2.0,
            jitter: true,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts.max(1));
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Whether another attempt is allowed after `attempts_made` tries.
    pub(crate) fn allows_another(&self, attempts_made: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempts_made < max)
    }

    /// Delay before retry number `attempt` (0-indexed).
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        // Clamp the exponent so unbounded retries never overflow to inf
        let exponent = attempt.min(32) as i32;
        let delay_secs = self.base_delay.as_secs_f64() * self.exponential_base.powi(exponent);
        let capped_secs = delay_secs.min(self.max_delay.as_secs_f64());

        let final_secs = if self.jitter {
            let factor = rand::rng().random_range(0.5..1.5);
            (capped_secs * factor).min(self.max_delay.as_secs_f64())
        } else {
            capped_secs
        };

        Duration::from_secs_f64(final_secs)
    }

    /// Backoff delay, raised to `floor` when the server asked for a longer wait.
    pub fn delay_with_floor(&self, attempt: u32, floor: Option<Duration>) -> Duration {
        let delay = self.calculate_delay(attempt);
        floor.map_or(delay, |floor| delay.max(floor))
    }
}

/// Statistics about a retried operation.
#[derive(Debug, Clone, Default)]
pub struct RetryStats {
    pub attempts: u32,
    pub total_delay: Duration,
    pub success: bool,
    pub last_error: Option<String>,
}

/// Retry an async operation with exponential backoff.
///
/// `should_retry` decides whether an error is transient. Non-transient
/// errors are returned after the first attempt.
pub async fn retry_async<F, Fut, T, E>(
    config: &RetryConfig,
    operation: F,
    should_retry: impl Fn(&E) -> bool,
) -> (Result<T, E>, RetryStats)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_async_with_floor(config, operation, should_retry, |_| None).await
}

/// Like [`retry_async`], but waits at least `delay_floor(&error)` before the
/// next attempt, for errors that carry a server-requested wait.
pub async fn retry_async_with_floor<F, Fut, T, E>(
    config: &RetryConfig,
    mut operation: F,
    should_retry: impl Fn(&E) -> bool,
    delay_floor: impl Fn(&E) -> Option<Duration>,
) -> (Result<T, E>, RetryStats)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut stats = RetryStats::default();
    let mut attempt: u32 = 0;

    loop {
        stats.attempts = attempt.saturating_add(1);

        match operation().await {
            Ok(value) => {
                stats.success = true;
                if attempt > 0 {
                    debug!("Operation succeeded after {} attempts", stats.attempts);
                }
                return (Ok(value), stats);
            }
            Err(e) => {
                stats.last_error = Some(e.to_string());

                if !should_retry(&e) {
                    debug!("Error is not retryable: {}", e);
                    return (Err(e), stats);
                }

                if !config.allows_another(stats.attempts) {
                    warn!(
                        "All {} retry attempts exhausted. Last error: {}",
                        stats.attempts, e
                    );
                    return (Err(e), stats);
                }

                let delay = config.delay_with_floor(attempt, delay_floor(&e));
                stats.total_delay += delay;

                match config.max_attempts {
                    Some(max) => warn!(
                        "Attempt {}/{} failed: {}. Retrying in {:?}",
                        stats.attempts, max, e, delay
                    ),
                    None => warn!(
                        "Attempt {} failed: {}. Retrying in {:?}",
                        stats.attempts, e, delay
                    ),
                }

                tokio::time::sleep(delay).await;
                attempt = attempt.saturating_add(1);
            }
        }
    }
}
