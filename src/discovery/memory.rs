// src/discovery/memory.rs

// In-memory registry (for tests, local runs and simulations).
// Each registration gets its own health-check task, so lookups only ever
// return instances that passed their most recent probe.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::discovery::health_checker::{HealthCheckConfig, HealthChecker, HealthProbe, HttpHealthProbe};
use crate::discovery::{Endpoint, ServiceRegistration, ServiceRegistry};
use crate::error::Result;

#[derive(Debug)]
struct RegistryEntry {
    registration: ServiceRegistration,
    checker: HealthChecker,
    registered_at: DateTime<Utc>,
}

/// Registry backend held entirely in process memory
#[derive(Debug)]
pub struct InMemoryRegistry {
    entries: DashMap<String, RegistryEntry>,
    probe: Arc<dyn HealthProbe>,
}

impl InMemoryRegistry {
    /// Registry probing health URLs over HTTP
    pub fn new() -> Self {
        Self::with_probe(Arc::new(HttpHealthProbe::new()))
    }

    /// Registry using a custom probe
    pub fn with_probe(probe: Arc<dyn HealthProbe>) -> Self {
        Self {
            entries: DashMap::new(),
            probe,
        }
    }

    /// Health of a registration; `None` for unknown ids
    pub fn is_healthy(&self, service_id: &str) -> Option<bool> {
        self.entries
            .get(service_id)
            .map(|entry| entry.checker.is_healthy())
    }

    /// When a registration was last probed
    pub fn last_checked(&self, service_id: &str) -> Option<DateTime<Utc>> {
        self.entries
            .get(service_id)
            .and_then(|entry| entry.checker.last_checked())
    }

    /// When a registration was enrolled
    pub fn registered_at(&self, service_id: &str) -> Option<DateTime<Utc>> {
        self.entries.get(service_id).map(|entry| entry.registered_at)
    }

    /// All registrations regardless of health
    pub fn registrations(&self) -> Vec<ServiceRegistration> {
        self.entries
            .iter()
            .map(|entry| entry.registration.clone())
            .collect()
    }
}

impl Default for InMemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServiceRegistry for InMemoryRegistry {
    async fn register(&self, registration: &ServiceRegistration) -> Result<()> {
        let checker = HealthChecker::new(
            Arc::clone(&self.probe),
            registration.health_check_target(),
            HealthCheckConfig {
                check_interval: registration.check_interval,
                check_timeout: registration.check_timeout,
            },
        );
        checker.start();

        // re-registering the same id replaces the entry; dropping the old
        // checker stops its task
        let previous = self.entries.insert(
            registration.id.clone(),
            RegistryEntry {
                registration: registration.clone(),
                checker,
                registered_at: Utc::now(),
            },
        );

        if previous.is_some() {
            debug!(id = %registration.id, "Replaced existing registration");
        }
        info!(id = %registration.id, service = %registration.name, "Registered instance");
        Ok(())
    }

    async fn deregister(&self, service_id: &str) -> Result<()> {
        match self.entries.remove(service_id) {
            Some((_, entry)) => {
                entry.checker.stop();
                info!(id = service_id, "Deregistered instance");
            }
            None => debug!(id = service_id, "Deregister of unknown id ignored"),
        }
        Ok(())
    }

    async fn query_healthy(&self, name: &str) -> Result<Vec<Endpoint>> {
        Ok(self
            .entries
            .iter()
            .filter(|entry| entry.registration.name == name && entry.checker.is_healthy())
            .map(|entry| entry.registration.endpoint())
            .collect())
    }
}
