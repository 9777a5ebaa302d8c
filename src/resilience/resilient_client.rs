use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::call_outcome;
use crate::config::MeshConfig;
use crate::discovery::ServiceDiscovery;
use crate::error::{MeshError, Result, TransportError};
use crate::resilience::circuit_breaker::{BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig};
use crate::resilience::clock::{Clock, SystemClock};
use crate::resilience::exponential_backoff::{RetryConfig, RetryPolicy};
use crate::transport::{Method, ServiceRequest, ServiceResponse, Transport};

/// Resilient service-to-service client
///
/// Every call goes through the same path:
///
/// ```plaintext
/// caller
///   │
///   ▼
/// ServiceDiscovery::resolve(name) ──► ServiceNotFound
///   │
///   ▼
/// CircuitBreaker (one per destination) ──► CircuitOpen
///   │
///   ▼
/// RetryPolicy ──► RetriesExhausted
///   │
///   ▼
/// Transport (one attempt, bounded by request_timeout)
/// ```
#[derive(Debug)]
pub struct ResilientClient {
    discovery: Arc<ServiceDiscovery>,
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
    breaker_config: CircuitBreakerConfig,
    /// Breakers keyed by destination service name, created on first use
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    clock: Arc<dyn Clock>,
    request_timeout: Duration,
}

impl ResilientClient {
    pub fn new(
        discovery: Arc<ServiceDiscovery>,
        transport: Arc<dyn Transport>,
        breaker_config: CircuitBreakerConfig,
        retry_config: RetryConfig,
    ) -> Self {
        Self {
            discovery,
            transport,
            retry: RetryPolicy::new(retry_config),
            breaker_config,
            breakers: DashMap::new(),
            clock: Arc::new(SystemClock),
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Build from the aggregate configuration
    pub fn from_config(
        discovery: Arc<ServiceDiscovery>,
        transport: Arc<dyn Transport>,
        config: &MeshConfig,
    ) -> Self {
        Self::new(
            discovery,
            transport,
            config.circuit_breaker.clone(),
            config.retry.clone(),
        )
        .with_request_timeout(config.request_timeout)
    }

    /// Clock handed to every breaker created afterwards
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Deadline for a single network attempt
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn discovery(&self) -> &Arc<ServiceDiscovery> {
        &self.discovery
    }

    /// `GET path` on a healthy instance of `service`
    pub async fn get(&self, service: &str, path: &str) -> Result<ServiceResponse> {
        self.get_with_cancel(service, path, &CancellationToken::new())
            .await
    }

    /// [`get`](Self::get), aborted when `cancel` fires
    pub async fn get_with_cancel(
        &self,
        service: &str,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<ServiceResponse> {
        self.call(service, Method::Get, path, None, cancel).await
    }

    /// `POST path` with a JSON body on a healthy instance of `service`
    pub async fn post<B: Serialize + ?Sized>(
        &self,
        service: &str,
        path: &str,
        body: &B,
    ) -> Result<ServiceResponse> {
        self.post_with_cancel(service, path, body, &CancellationToken::new())
            .await
    }

    /// [`post`](Self::post), aborted when `cancel` fires
    pub async fn post_with_cancel<B: Serialize + ?Sized>(
        &self,
        service: &str,
        path: &str,
        body: &B,
        cancel: &CancellationToken,
    ) -> Result<ServiceResponse> {
        let body = serde_json::to_vec(body)
            .map_err(|e| MeshError::Internal(format!("failed to encode request body: {}", e)))?;
        self.call(service, Method::Post, path, Some(body), cancel)
            .await
    }

    /// `GET path` and decode the JSON body into `T`.
    ///
    /// A body that does not decode yields `Decode`; it is neither retried nor
    /// counted by the breaker.
    pub async fn get_json<T: DeserializeOwned>(&self, service: &str, path: &str) -> Result<T> {
        self.get_json_with_cancel(service, path, &CancellationToken::new())
            .await
    }

    /// [`get_json`](Self::get_json), aborted when `cancel` fires
    pub async fn get_json_with_cancel<T: DeserializeOwned>(
        &self,
        service: &str,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<T> {
        let response = self.get_with_cancel(service, path, cancel).await?;
        response.json()
    }

    /// Issue one logical call.
    ///
    /// Cancelling `cancel` aborts the in-flight attempt or backoff and yields
    /// `Cancelled`, which the breaker does not count.
    pub async fn call(
        &self,
        service: &str,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
        cancel: &CancellationToken,
    ) -> Result<ServiceResponse> {
        let call_id = Uuid::new_v4();
        let start = Instant::now();

        let result = self
            .resolve_and_send(call_id, service, method, path, body, cancel)
            .await;

        if let Err(e) = &result {
            if e.counts_against_breaker() {
                self.discovery.invalidate(service);
            }
            debug!(
                call_id = %call_id,
                service,
                error = %e,
                last_status = ?e.last_status(),
                "Call failed"
            );
        }

        call_outcome!(
            call_id,
            service,
            method.as_str(),
            result,
            start.elapsed().as_millis() as u64
        );
        result
    }

    async fn resolve_and_send(
        &self,
        call_id: Uuid,
        service: &str,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
        cancel: &CancellationToken,
    ) -> Result<ServiceResponse> {
        let endpoint = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(MeshError::Cancelled),
            resolved = self.discovery.resolve(service) => resolved?,
        };

        let request = ServiceRequest {
            method,
            url: endpoint.url(path),
            body,
        };
        debug!(call_id = %call_id, service, url = %request.url, "Resolved endpoint");

        let breaker = self.breaker_for(service);
        let request = &request;
        breaker
            .execute(move || {
                self.retry.execute(service, cancel, move || {
                    self.attempt(service, request.clone(), cancel)
                })
            })
            .await
    }

    /// One network attempt, classified by status
    async fn attempt(
        &self,
        service: &str,
        request: ServiceRequest,
        cancel: &CancellationToken,
    ) -> Result<ServiceResponse> {
        let send = time::timeout(self.request_timeout, self.transport.send(request));

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(MeshError::Cancelled),
            outcome = send => match outcome {
                Ok(response) => response?,
                Err(_) => {
                    return Err(MeshError::Transport(TransportError::Timeout(
                        self.request_timeout,
                    )))
                }
            },
        };

        if response.is_success() {
            Ok(response)
        } else if self.retry.config().is_retryable_status(response.status) {
            Err(MeshError::Transport(TransportError::Status(response.status)))
        } else {
            Err(MeshError::NonRetryableStatus {
                service: service.to_string(),
                status: response.status,
            })
        }
    }

    /// The breaker guarding `service`, created on first use
    pub fn breaker_for(&self, service: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.get(service) {
            return Arc::clone(breaker.value());
        }

        let entry = self.breakers.entry(service.to_string()).or_insert_with(|| {
            Arc::new(CircuitBreaker::with_clock(
                service,
                self.breaker_config.clone(),
                Arc::clone(&self.clock),
            ))
        });
        Arc::clone(entry.value())
    }

    /// Snapshot of every breaker created so far, sorted by service name
    pub fn breaker_states(&self) -> Vec<BreakerSnapshot> {
        let mut snapshots: Vec<BreakerSnapshot> = self
            .breakers
            .iter()
            .map(|entry| entry.value().snapshot())
            .collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }
}
