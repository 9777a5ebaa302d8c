// src/discovery/tests/service_discovery_tests.rs

use std::sync::Arc;
use std::time::Duration;
use tokio::time;

use crate::config::{DiscoveryConfig, RegistrationConfig, SelectionStrategy};
use crate::discovery::{Endpoint, RoundRobinSelector, ServiceDiscovery, ServiceRegistration};
use crate::error::MeshError;
use crate::test_utils::StaticRegistry;

#[test]
fn test_registration_id_and_health_target() {
    let registration = ServiceRegistration::new("orders", "10.0.0.7", 5002, "/health");
    assert_eq!(registration.id, "orders-10.0.0.7-5002");
    assert_eq!(registration.health_check_target(), "http://10.0.0.7:5002/health");
    assert_eq!(registration.check_interval, Duration::from_secs(10));
    assert_eq!(registration.check_timeout, Duration::from_secs(5));

    let absolute = ServiceRegistration::new("orders", "10.0.0.7", 5002, "http://probe.local/ready");
    assert_eq!(absolute.health_check_target(), "http://probe.local/ready");
}

#[test]
fn test_endpoint_url_joins_paths() {
    let endpoint = Endpoint::new("10.0.0.5", 9001);
    assert_eq!(endpoint.url("/api/users"), "http://10.0.0.5:9001/api/users");
    assert_eq!(endpoint.url("api/users"), "http://10.0.0.5:9001/api/users");
    assert_eq!(endpoint.to_string(), "10.0.0.5:9001");
}

#[tokio::test]
async fn test_register_remembers_own_id_and_shutdown_deregisters() {
    let discovery = ServiceDiscovery::new(Arc::new(StaticRegistry::new()));

    let id = discovery.register("users", "10.0.0.9", 5001, "/health").await.unwrap();
    assert_eq!(discovery.registration_id(), Some(id));

    discovery.shutdown().await.unwrap();
    assert_eq!(discovery.registration_id(), None);

    // second shutdown has nothing to do
    discovery.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unreachable_registry_fails_registration() {
    let registry = Arc::new(StaticRegistry::new());
    registry.set_unreachable(true);
    let discovery = ServiceDiscovery::new(registry);

    let result = discovery.register("users", "10.0.0.9", 5001, "/health").await;

    assert!(matches!(result, Err(MeshError::Registration(_))));
    assert_eq!(discovery.registration_id(), None);
}

#[tokio::test]
async fn test_resolve_without_cache_queries_every_time() {
    let registry = Arc::new(
        StaticRegistry::new().with_service("users", vec![Endpoint::new("10.0.0.9", 5001)]),
    );
    let discovery = ServiceDiscovery::new(registry.clone());

    for _ in 0..3 {
        discovery.resolve("users").await.unwrap();
    }
    assert_eq!(registry.queries(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_cache_expires_after_ttl() {
    let registry = Arc::new(
        StaticRegistry::new().with_service("users", vec![Endpoint::new("10.0.0.9", 5001)]),
    );
    let discovery =
        ServiceDiscovery::new(registry.clone()).with_cache_ttl(Duration::from_secs(5));

    discovery.resolve("users").await.unwrap();
    discovery.resolve("users").await.unwrap();
    assert_eq!(registry.queries(), 1);

    time::sleep(Duration::from_secs(6)).await;
    discovery.resolve("users").await.unwrap();
    assert_eq!(registry.queries(), 2);

    discovery.invalidate("users");
    discovery.resolve("users").await.unwrap();
    assert_eq!(registry.queries(), 3);
}

#[tokio::test]
async fn test_empty_result_is_not_cached() {
    let registry = Arc::new(StaticRegistry::new());
    let discovery =
        ServiceDiscovery::new(registry.clone()).with_cache_ttl(Duration::from_secs(60));

    assert!(matches!(
        discovery.resolve("users").await,
        Err(MeshError::ServiceNotFound(_))
    ));
    assert!(discovery.resolve("users").await.is_err());
    assert_eq!(registry.queries(), 2);
}

#[tokio::test]
async fn test_registry_failure_propagates() {
    let registry = Arc::new(StaticRegistry::new());
    registry.set_unreachable(true);
    let discovery = ServiceDiscovery::new(registry);

    assert!(matches!(
        discovery.resolve("users").await,
        Err(MeshError::Registry(_))
    ));
}

#[tokio::test]
async fn test_injected_selector_is_used() {
    let registry = Arc::new(StaticRegistry::new().with_service(
        "users",
        vec![Endpoint::new("10.0.0.1", 5001), Endpoint::new("10.0.0.2", 5001)],
    ));
    let discovery = ServiceDiscovery::with_selector(registry, Arc::new(RoundRobinSelector::new()));

    assert_eq!(discovery.resolve("users").await.unwrap().address, "10.0.0.1");
    assert_eq!(discovery.resolve("users").await.unwrap().address, "10.0.0.2");
    assert_eq!(discovery.resolve("users").await.unwrap().address, "10.0.0.1");
}

#[tokio::test]
async fn test_from_config_applies_registration_checks() {
    let registry = Arc::new(StaticRegistry::new());
    let discovery = ServiceDiscovery::from_config(
        registry.clone(),
        &DiscoveryConfig {
            cache_ttl: None,
            selection: SelectionStrategy::RoundRobin,
        },
        &RegistrationConfig {
            check_interval: Duration::from_secs(3),
            check_timeout: Duration::from_secs(1),
            deregister_critical_after: Some(Duration::from_secs(60)),
        },
    );

    discovery.register("users", "10.0.0.9", 5001, "/health").await.unwrap();
    let endpoints = discovery.resolve_all("users").await.unwrap();
    assert_eq!(endpoints, vec![Endpoint::new("10.0.0.9", 5001)]);
}
