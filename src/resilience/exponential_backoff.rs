use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::duration_serde;
use crate::error::{MeshError, Result};

/// Configuration for retry strategy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    /// Backoff before the first retry
    #[serde(default = "default_initial_backoff", with = "duration_serde")]
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    #[serde(default = "default_max_backoff", with = "duration_serde")]
    pub max_backoff: Duration,
    /// Multiplier for exponential backoff
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Whether to add jitter to backoff
    #[serde(default)]
    pub use_jitter: bool,
    /// 4xx statuses treated as transient; every 5xx is always transient
    #[serde(default = "default_retryable_statuses")]
    pub retryable_statuses: Vec<u16>,
}

fn default_max_retries() -> usize {
    3
}

fn default_initial_backoff() -> Duration {
    Duration::from_secs(2)
}

fn default_max_backoff() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_retryable_statuses() -> Vec<u16> {
    vec![408, 429]
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
            backoff_multiplier: default_backoff_multiplier(),
            use_jitter: false,
            retryable_statuses: default_retryable_statuses(),
        }
    }
}

impl RetryConfig {
    /// Whether a response with this status should be retried
    pub fn is_retryable_status(&self, status: u16) -> bool {
        (500..600).contains(&status) || self.retryable_statuses.contains(&status)
    }
}

/// Exponential backoff implementation for retries
pub struct ExponentialBackoff {
    /// Current attempt number
    current_attempt: usize,
    /// Configuration for the retry strategy
    config: RetryConfig,
}

impl ExponentialBackoff {
    /// Create a new exponential backoff with the given configuration
    pub fn new(config: RetryConfig) -> Self {
        Self {
            current_attempt: 0,
            config,
        }
    }

    /// Get the next backoff duration, or None if max retries reached
    pub fn next_backoff(&mut self) -> Option<Duration> {
        self.current_attempt += 1;

        if self.current_attempt > self.config.max_retries {
            return None;
        }

        let exp = self.current_attempt as f64 - 1.0;
        let base_ms = self.config.initial_backoff.as_millis() as f64;
        let backoff_ms = base_ms * self.config.backoff_multiplier.powf(exp);
        let max_ms = self.config.max_backoff.as_millis() as f64;
        let capped_ms = backoff_ms.min(max_ms);

        let jittered_ms = if self.config.use_jitter {
            // Add jitter: random value between 50% and 100% of the calculated backoff
            let jitter = rand::random::<f64>() * 0.5 + 0.5;
            (capped_ms * jitter) as u64
        } else {
            capped_ms as u64
        };

        Some(Duration::from_millis(jittered_ms))
    }

    /// Reset the backoff to start from the beginning
    pub fn reset(&mut self) {
        self.current_attempt = 0;
    }
}

/// Stateless retry wrapper; one instance is shared by every call
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error or
    /// the retries run out.
    ///
    /// `service` names the dependency in logs and in `RetriesExhausted`.
    /// Only the calling task sleeps between attempts. Cancelling `cancel`
    /// aborts a pending backoff and returns `Cancelled`.
    pub async fn execute<T, F, Fut>(
        &self,
        service: &str,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut backoff = ExponentialBackoff::new(self.config.clone());
        let mut attempts = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(MeshError::Cancelled);
            }

            attempts += 1;
            let err = match operation().await {
                Ok(value) => {
                    if attempts > 1 {
                        debug!(service, attempts, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_retryable() => e,
                Err(e) => return Err(e),
            };

            let Some(delay) = backoff.next_backoff() else {
                warn!(service, attempts, error = %err, "Retries exhausted");
                return Err(MeshError::RetriesExhausted {
                    service: service.to_string(),
                    attempts,
                    last: Box::new(err),
                });
            };

            warn!(
                service,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retry {} in {:?}",
                attempts,
                delay
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(MeshError::Cancelled),
                _ = time::sleep(delay) => {}
            }
        }
    }
}
