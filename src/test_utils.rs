// src/test_utils.rs

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{self, Instant};

use crate::discovery::{Endpoint, HealthProbe, ServiceDiscovery, ServiceRegistration, ServiceRegistry};
use crate::error::{MeshError, Result, TransportError};
use crate::resilience::{CircuitBreakerConfig, Clock, ResilientClient, RetryConfig};
use crate::transport::{ServiceRequest, ServiceResponse, Transport};

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    current_time: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            current_time: Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, duration: Duration) {
        let mut time = self.current_time.lock().unwrap();
        *time += duration;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.current_time.lock().unwrap()
    }
}

/// Scripted outcome of one transport attempt
#[derive(Debug, Clone)]
pub enum MockReply {
    Status(u16, &'static str),
    ConnectError,
    /// Never answers; exercises timeouts and cancellation
    Hang,
}

/// Transport that replays scripted replies and records every request
#[derive(Debug)]
pub struct MockTransport {
    replies: Mutex<VecDeque<MockReply>>,
    /// Used once the script runs out
    fallback: MockReply,
    requests: Mutex<Vec<ServiceRequest>>,
    calls: AtomicUsize,
}

impl MockTransport {
    pub fn new(fallback: MockReply) -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            fallback,
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Always answers 200 with `body`
    pub fn ok(body: &'static str) -> Self {
        Self::new(MockReply::Status(200, body))
    }

    pub fn with_script(self, replies: Vec<MockReply>) -> Self {
        *self.replies.lock().unwrap() = replies.into();
        self
    }

    pub fn push(&self, reply: MockReply) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ServiceRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: ServiceRequest) -> Result<ServiceResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);

        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        match reply {
            MockReply::Status(status, body) => Ok(ServiceResponse::new(status, body)),
            MockReply::ConnectError => Err(MeshError::Transport(TransportError::Connect(
                "connection refused".to_string(),
            ))),
            MockReply::Hang => {
                futures::future::pending::<()>().await;
                unreachable!()
            }
        }
    }
}

/// Health probe whose verdict is set by the test
#[derive(Debug)]
pub struct MockHealthProbe {
    healthy: AtomicBool,
    /// URLs that always fail regardless of the global verdict
    failing: Mutex<HashSet<String>>,
    probes: AtomicUsize,
}

impl MockHealthProbe {
    pub fn new(healthy: bool) -> Self {
        Self {
            healthy: AtomicBool::new(healthy),
            failing: Mutex::new(HashSet::new()),
            probes: AtomicUsize::new(0),
        }
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn fail_url(&self, url: &str) {
        self.failing.lock().unwrap().insert(url.to_string());
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthProbe for MockHealthProbe {
    async fn probe(&self, url: &str) -> bool {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.healthy.load(Ordering::SeqCst) && !self.failing.lock().unwrap().contains(url)
    }
}

/// Registry with a fixed endpoint table and a lookup counter
#[derive(Debug, Default)]
pub struct StaticRegistry {
    services: Mutex<HashMap<String, Vec<Endpoint>>>,
    queries: AtomicUsize,
    unreachable: AtomicBool,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_service(self, name: &str, endpoints: Vec<Endpoint>) -> Self {
        self.services
            .lock()
            .unwrap()
            .insert(name.to_string(), endpoints);
        self
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ServiceRegistry for StaticRegistry {
    async fn register(&self, registration: &ServiceRegistration) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(MeshError::Registration("registry unreachable".to_string()));
        }
        self.services
            .lock()
            .unwrap()
            .entry(registration.name.clone())
            .or_default()
            .push(registration.endpoint());
        Ok(())
    }

    async fn deregister(&self, _service_id: &str) -> Result<()> {
        Ok(())
    }

    async fn query_healthy(&self, name: &str) -> Result<Vec<Endpoint>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(MeshError::Registry("registry unreachable".to_string()));
        }
        Ok(self
            .services
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or_default())
    }
}

/// Retry settings with millisecond delays so tests finish quickly
pub fn fast_retry_config() -> RetryConfig {
    RetryConfig {
        max_retries: 3,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(10),
        backoff_multiplier: 2.0,
        use_jitter: false,
        ..RetryConfig::default()
    }
}

/// Client over a single static instance of `service` at 10.0.0.5:9001
pub fn create_test_client(
    service: &str,
    transport: Arc<MockTransport>,
    breaker: CircuitBreakerConfig,
    retry: RetryConfig,
    clock: Arc<ManualClock>,
) -> ResilientClient {
    let registry = StaticRegistry::new().with_service(service, vec![Endpoint::new("10.0.0.5", 9001)]);
    let discovery = Arc::new(ServiceDiscovery::new(Arc::new(registry)));
    ResilientClient::new(discovery, transport, breaker, retry).with_clock(clock)
}

/// Let spawned background tasks (health checkers) run
pub async fn settle() {
    time::sleep(Duration::from_millis(10)).await;
}
