// src/discovery/mod.rs
//! Service registration and lookup.
//!
//! A [`ServiceRegistry`] is the shared directory backend (Consul in
//! production, [`InMemoryRegistry`] for tests and local runs). The
//! [`ServiceDiscovery`] client on top of it owns this process's registration
//! and resolves logical names to one healthy endpoint per call.

pub mod consul;
pub mod health_checker;
pub mod memory;
pub mod selector;

#[cfg(test)]
mod tests;

pub use consul::ConsulRegistry;
pub use health_checker::{HealthCheckConfig, HealthChecker, HealthProbe, HttpHealthProbe};
pub use memory::InMemoryRegistry;
pub use selector::{EndpointSelector, RandomSelector, RoundRobinSelector};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{DiscoveryConfig, RegistrationConfig, SelectionStrategy};
use crate::error::{MeshError, Result};
use crate::registry_op;

/// A network address of one live service instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub address: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.address, self.port)
    }

    /// Join a request path onto this endpoint
    pub fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url(), path)
        } else {
            format!("{}/{}", self.base_url(), path)
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// One process instance enrolled in the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRegistration {
    /// `{name}-{address}-{port}`, unique per process instance
    pub id: String,
    pub name: String,
    pub address: String,
    pub port: u16,
    /// Absolute URL, or a path resolved against `address:port`
    pub health_check_url: String,
    pub check_interval: Duration,
    pub check_timeout: Duration,
    pub deregister_critical_after: Option<Duration>,
}

impl ServiceRegistration {
    /// Registration with the default 10s interval and 5s timeout
    pub fn new(
        name: impl Into<String>,
        address: impl Into<String>,
        port: u16,
        health_check_url: impl Into<String>,
    ) -> Self {
        let name = name.into();
        let address = address.into();
        let defaults = RegistrationConfig::default();

        Self {
            id: format!("{}-{}-{}", name, address, port),
            name,
            address,
            port,
            health_check_url: health_check_url.into(),
            check_interval: defaults.check_interval,
            check_timeout: defaults.check_timeout,
            deregister_critical_after: defaults.deregister_critical_after,
        }
    }

    /// Apply health check parameters from configuration
    pub fn with_checks(mut self, config: &RegistrationConfig) -> Self {
        self.check_interval = config.check_interval;
        self.check_timeout = config.check_timeout;
        self.deregister_critical_after = config.deregister_critical_after;
        self
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.address.clone(), self.port)
    }

    /// The URL the registry should probe
    pub fn health_check_target(&self) -> String {
        let url = self.health_check_url.as_str();
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            self.endpoint().url(url)
        }
    }
}

/// Core trait that every registry backend must implement
#[async_trait]
pub trait ServiceRegistry: Send + Sync + Debug {
    /// Enroll an instance together with its health check
    async fn register(&self, registration: &ServiceRegistration) -> Result<()>;

    /// Remove an instance; unknown ids are not an error
    async fn deregister(&self, service_id: &str) -> Result<()>;

    /// Instances of `name` currently passing their health check
    async fn query_healthy(&self, name: &str) -> Result<Vec<Endpoint>>;
}

#[derive(Debug)]
struct CachedEndpoints {
    fetched_at: Instant,
    endpoints: Vec<Endpoint>,
}

/// Discovery client: owns this process's registration and resolves
/// dependencies by name
#[derive(Debug)]
pub struct ServiceDiscovery {
    registry: Arc<dyn ServiceRegistry>,
    selector: Arc<dyn EndpointSelector>,
    registration_config: RegistrationConfig,
    cache_ttl: Option<Duration>,
    cache: DashMap<String, CachedEndpoints>,
    /// Id of this process's own registration, if any
    registered_id: Mutex<Option<String>>,
}

impl ServiceDiscovery {
    /// Random selection, no cache, default health checks
    pub fn new(registry: Arc<dyn ServiceRegistry>) -> Self {
        Self::with_selector(registry, Arc::new(RandomSelector::new()))
    }

    pub fn with_selector(
        registry: Arc<dyn ServiceRegistry>,
        selector: Arc<dyn EndpointSelector>,
    ) -> Self {
        Self {
            registry,
            selector,
            registration_config: RegistrationConfig::default(),
            cache_ttl: None,
            cache: DashMap::new(),
            registered_id: Mutex::new(None),
        }
    }

    /// Build from configuration
    pub fn from_config(
        registry: Arc<dyn ServiceRegistry>,
        discovery: &DiscoveryConfig,
        registration: &RegistrationConfig,
    ) -> Self {
        let selector: Arc<dyn EndpointSelector> = match discovery.selection {
            SelectionStrategy::Random => Arc::new(RandomSelector::new()),
            SelectionStrategy::RoundRobin => Arc::new(RoundRobinSelector::new()),
        };

        let mut discovery_client = Self::with_selector(registry, selector);
        discovery_client.registration_config = registration.clone();
        discovery_client.cache_ttl = discovery.cache_ttl;
        discovery_client
    }

    /// Reuse resolved endpoint sets for `ttl`
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    /// Enroll this process under `name` and return the registration id.
    ///
    /// Fails with `Registration` if the backend is unreachable.
    pub async fn register(
        &self,
        name: &str,
        address: &str,
        port: u16,
        health_check_url: &str,
    ) -> Result<String> {
        let registration = ServiceRegistration::new(name, address, port, health_check_url)
            .with_checks(&self.registration_config);

        let start = Instant::now();
        let result = self.registry.register(&registration).await;
        registry_op!("register", name, result, start.elapsed().as_millis() as u64);

        match result {
            Ok(()) => {
                info!(service = name, id = %registration.id, "Service registered successfully");
                *self.own_id() = Some(registration.id.clone());
                Ok(registration.id)
            }
            Err(MeshError::Registration(msg)) => Err(MeshError::Registration(msg)),
            Err(e) => Err(MeshError::Registration(e.to_string())),
        }
    }

    /// Remove a registration; idempotent
    pub async fn deregister(&self, registration_id: &str) -> Result<()> {
        let start = Instant::now();
        let result = self.registry.deregister(registration_id).await;
        registry_op!("deregister", registration_id, result, start.elapsed().as_millis() as u64);
        result?;

        let mut own = self.own_id();
        if own.as_deref() == Some(registration_id) {
            *own = None;
        }
        info!(id = registration_id, "Service deregistered successfully");
        Ok(())
    }

    /// Deregister this process's own registration, if it has one
    pub async fn shutdown(&self) -> Result<()> {
        let id = self.own_id().take();
        match id {
            Some(id) => self.deregister(&id).await,
            None => Ok(()),
        }
    }

    /// Id of this process's own registration
    pub fn registration_id(&self) -> Option<String> {
        self.own_id().clone()
    }

    /// Resolve `name` to one healthy endpoint chosen by the selector
    pub async fn resolve(&self, name: &str) -> Result<Endpoint> {
        let endpoints = self.resolve_all(name).await?;
        self.selector
            .select(&endpoints)
            .ok_or_else(|| MeshError::ServiceNotFound(name.to_string()))
    }

    /// Every healthy endpoint of `name`; fails when there are none
    pub async fn resolve_all(&self, name: &str) -> Result<Vec<Endpoint>> {
        if let Some(endpoints) = self.cached(name) {
            debug!(service = name, count = endpoints.len(), "Using cached endpoints");
            return Ok(endpoints);
        }

        let start = Instant::now();
        let result = self.registry.query_healthy(name).await;
        registry_op!("query_healthy", name, result, start.elapsed().as_millis() as u64);
        let endpoints = result?;

        if endpoints.is_empty() {
            warn!(service = name, "No healthy instances");
            return Err(MeshError::ServiceNotFound(name.to_string()));
        }

        if self.cache_ttl.is_some() {
            self.cache.insert(
                name.to_string(),
                CachedEndpoints {
                    fetched_at: Instant::now(),
                    endpoints: endpoints.clone(),
                },
            );
        }

        Ok(endpoints)
    }

    /// Drop any cached endpoints for `name`
    pub fn invalidate(&self, name: &str) {
        if self.cache.remove(name).is_some() {
            debug!(service = name, "Invalidated cached endpoints");
        }
    }

    fn cached(&self, name: &str) -> Option<Vec<Endpoint>> {
        let ttl = self.cache_ttl?;
        let entry = self.cache.get(name)?;
        if entry.fetched_at.elapsed() < ttl {
            Some(entry.endpoints.clone())
        } else {
            drop(entry);
            self.cache.remove(name);
            None
        }
    }

    fn own_id(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.registered_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
