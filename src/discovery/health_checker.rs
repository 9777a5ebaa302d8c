use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Configuration for health checks
#[derive(Debug, Clone)]
pub struct HealthCheckConfig {
    /// How often to probe the instance
    pub check_interval: Duration,
    /// Timeout for a single probe
    pub check_timeout: Duration,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(10),
            check_timeout: Duration::from_secs(5),
        }
    }
}

/// One health probe against an instance's health URL
#[async_trait]
pub trait HealthProbe: Debug + Send + Sync {
    /// True only for a `200` answered within the check timeout
    async fn probe(&self, url: &str) -> bool;
}

/// Probes over HTTP with `GET url`
#[derive(Debug, Clone, Default)]
pub struct HttpHealthProbe {
    client: Client,
}

impl HttpHealthProbe {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn probe(&self, url: &str) -> bool {
        match self.client.get(url).send().await {
            Ok(response) if response.status().as_u16() == 200 => true,
            Ok(response) => {
                debug!(url, status = response.status().as_u16(), "Health check returned non-200");
                false
            }
            Err(e) => {
                debug!(url, error = %e, "Health check request failed");
                false
            }
        }
    }
}

/// Periodic health check of a single registered instance
#[derive(Debug)]
pub struct HealthChecker {
    /// Flag indicating if the instance is healthy
    is_healthy: Arc<AtomicBool>,
    /// Time of the most recent completed probe
    last_checked: Arc<Mutex<Option<DateTime<Utc>>>>,
    probe: Arc<dyn HealthProbe>,
    /// URL being probed
    target: String,
    config: HealthCheckConfig,
    /// Cancel token for the health check task
    cancel: CancellationToken,
}

impl HealthChecker {
    /// Create a checker; the instance counts as unhealthy until its first
    /// probe passes
    pub fn new(probe: Arc<dyn HealthProbe>, target: impl Into<String>, config: HealthCheckConfig) -> Self {
        Self {
            is_healthy: Arc::new(AtomicBool::new(false)),
            last_checked: Arc::new(Mutex::new(None)),
            probe,
            target: target.into(),
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Start the health checker background task
    pub fn start(&self) -> task::JoinHandle<()> {
        let probe = Arc::clone(&self.probe);
        let is_healthy = Arc::clone(&self.is_healthy);
        let last_checked = Arc::clone(&self.last_checked);
        let target = self.target.clone();
        let interval = self.config.check_interval;
        let timeout = self.config.check_timeout;
        let cancel = self.cancel.clone();

        task::spawn(async move {
            let mut interval_timer = time::interval(interval.max(Duration::from_millis(1)));

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval_timer.tick() => {}
                }

                // Run the probe with a timeout
                let passed = match time::timeout(timeout, probe.probe(&target)).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(url = %target, "Health check timed out after {:?}", timeout);
                        false
                    }
                };

                *last_checked.lock().unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());

                // Update the health status
                let previous = is_healthy.swap(passed, Ordering::SeqCst);
                if previous != passed {
                    if passed {
                        info!(url = %target, "Instance is now healthy");
                    } else {
                        warn!(url = %target, "Instance is now unhealthy");
                    }
                }
            }

            debug!(url = %target, "Health checker task stopped");
        })
    }

    /// Stop the health checker
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Check if the instance is currently healthy
    pub fn is_healthy(&self) -> bool {
        self.is_healthy.load(Ordering::SeqCst)
    }

    /// When the last probe completed, if any has
    pub fn last_checked(&self) -> Option<DateTime<Utc>> {
        *self.last_checked.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

impl Drop for HealthChecker {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
