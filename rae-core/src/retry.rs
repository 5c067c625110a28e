//! Bounded retry with exponential backoff and jitter.
//!
//! Only recoverable errors ([`Error::is_recoverable`]) are retried.
//! Storage calls use a single retry; provider calls use the default
//! three.
//!
//! [`Error::is_recoverable`]: crate::error::Error::is_recoverable

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Errors that can report whether a retry is worthwhile.
pub trait Retryable {
    /// Whether a retry with backoff may succeed.
    fn is_recoverable(&self) -> bool;
}

impl Retryable for crate::error::Error {
    fn is_recoverable(&self) -> bool {
        self.is_recoverable()
    }
}

/// Counters for retry outcomes.
#[derive(Debug, Default)]
pub struct RetryMetrics {
    total: AtomicU64,
    success: AtomicU64,
    failure: AtomicU64,
}

impl RetryMetrics {
    /// Fresh counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a retry round and whether it ultimately succeeded.
    pub fn record_retry(&self, succeeded: bool) {
        self.total.fetch_add(1, Ordering::SeqCst);
        if succeeded {
            self.success.fetch_add(1, Ordering::SeqCst);
        } else {
            self.failure.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Total retries recorded.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }

    /// Retries that led to success.
    #[must_use]
    pub fn success_count(&self) -> u64 {
        self.success.load(Ordering::SeqCst)
    }

    /// Retries that still failed.
    #[must_use]
    pub fn failure_count(&self) -> u64 {
        self.failure.load(Ordering::SeqCst)
    }
}

/// Retry policy configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum retry attempts after the initial call.
    pub max_retries: u32,
    /// First backoff delay; doubles each attempt.
    pub base_delay: Duration,
    /// Backoff ceiling.
    pub max_delay: Duration,
    /// Jitter fraction applied to each delay (0 disables).
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            jitter_factor: 0.25,
        }
    }
}

impl RetryConfig {
    /// The storage policy: one retry, per the transient-error contract.
    #[must_use]
    pub fn storage() -> Self {
        Self {
            max_retries: 1,
            ..Self::default()
        }
    }

    /// Builder-style retry count.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Builder-style base delay.
    #[must_use]
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }
}

/// Executes operations under a [`RetryConfig`].
pub struct RetryPolicy {
    config: RetryConfig,
    metrics: Option<RetryMetrics>,
}

impl RetryPolicy {
    /// Policy with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RetryConfig::default())
    }

    /// Policy with explicit configuration.
    #[must_use]
    pub fn with_config(config: RetryConfig) -> Self {
        Self {
            config,
            metrics: None,
        }
    }

    /// Attach metrics counters.
    #[must_use]
    pub fn with_metrics(mut self, metrics: RetryMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn calculate_delay(&self, attempt: u32) -> Duration {
        let exp_delay = self.config.base_delay * 2u32.pow(attempt.saturating_sub(1));
        let delay = std::cmp::min(exp_delay, self.config.max_delay);

        if self.config.jitter_factor > 0.0 {
            let jitter_range = delay.as_millis() as f64 * self.config.jitter_factor;
            let jitter = (rand::random::<f64>() - 0.5) * 2.0 * jitter_range;
            let adjusted_ms = (delay.as_millis() as f64 + jitter).max(0.0);
            Duration::from_millis(adjusted_ms as u64)
        } else {
            delay
        }
    }

    fn record(&self, attempt: u32, succeeded: bool) {
        if attempt > 0 {
            if let Some(metrics) = &self.metrics {
                metrics.record_retry(succeeded);
            }
        }
    }

    /// Run an operation, retrying recoverable failures with backoff.
    pub async fn execute<F, T, E, Fut>(&mut self, operation: F) -> std::result::Result<T, E>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Retryable + std::fmt::Display,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(result) => {
                    self.record(attempt, true);
                    return Ok(result);
                }
                Err(error) => {
                    if !error.is_recoverable() || attempt >= self.config.max_retries {
                        self.record(attempt, false);
                        return Err(error);
                    }
                    attempt += 1;
                    let delay = self.calculate_delay(attempt);
                    warn!(
                        attempt,
                        max = self.config.max_retries,
                        %error,
                        ?delay,
                        "retrying after recoverable failure"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}
