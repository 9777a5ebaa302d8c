// src/tests/mesh_tests.rs

use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::config::MeshConfig;
use crate::discovery::{Endpoint, InMemoryRegistry, ServiceDiscovery};
use crate::error::MeshError;
use crate::resilience::{CircuitBreakerConfig, CircuitState, ResilientClient};
use crate::test_utils::{fast_retry_config, settle, MockHealthProbe, StaticRegistry};
use crate::transport::ReqwestTransport;

#[derive(Debug, Deserialize, PartialEq)]
struct User {
    id: u32,
    name: String,
}

fn endpoint_of(server: &MockServer) -> Endpoint {
    let addr = server.address();
    Endpoint::new(addr.ip().to_string(), addr.port())
}

fn client_for(server: &MockServer, breaker: CircuitBreakerConfig) -> ResilientClient {
    let registry = StaticRegistry::new().with_service("users", vec![endpoint_of(server)]);
    let discovery = Arc::new(ServiceDiscovery::new(Arc::new(registry)));
    let transport = Arc::new(ReqwestTransport::new(Duration::from_secs(2)).unwrap());
    ResilientClient::new(discovery, transport, breaker, fast_retry_config())
}

#[tokio::test]
async fn test_get_json_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/users/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": 1,
            "name": "Ada"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, CircuitBreakerConfig::default());
    let user: User = client.get_json("users", "/api/users/1").await.unwrap();

    assert_eq!(
        user,
        User {
            id: 1,
            name: "Ada".to_string()
        }
    );
}

#[tokio::test]
async fn test_service_unavailable_is_retried_until_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/users"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/users"))
        .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
        .mount(&server)
        .await;

    let client = client_for(&server, CircuitBreakerConfig::default());
    let response = client.get("users", "/api/users").await.unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_post_reaches_backend_with_json_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/orders"))
        .and(wiremock::matchers::body_json(serde_json::json!({ "sku": "kb-1", "qty": 2 })))
        .respond_with(ResponseTemplate::new(201).set_body_string(r#"{"id":42}"#))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, CircuitBreakerConfig::default());
    let response = client
        .post("users", "/api/orders", &serde_json::json!({ "sku": "kb-1", "qty": 2 }))
        .await
        .unwrap();

    assert_eq!(response.status, 201);
    assert_eq!(response.text(), r#"{"id":42}"#);
}

#[tokio::test]
async fn test_failing_backend_trips_breaker_and_stops_traffic() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = client_for(
        &server,
        CircuitBreakerConfig {
            failure_threshold: 2,
            open_timeout: Duration::from_secs(60),
        },
    );

    for _ in 0..2 {
        let result = client.get("users", "/api/users").await;
        assert!(matches!(result, Err(MeshError::RetriesExhausted { attempts: 4, .. })));
    }
    assert_eq!(client.breaker_for("users").get_state(), CircuitState::Open);

    let seen = server.received_requests().await.unwrap().len();
    let result = client.get("users", "/api/users").await;
    assert!(matches!(result, Err(MeshError::CircuitOpen { .. })));
    assert_eq!(server.received_requests().await.unwrap().len(), seen);
}

#[tokio::test]
async fn test_nothing_listening_is_a_transport_failure() {
    let registry = StaticRegistry::new().with_service("users", vec![Endpoint::new("127.0.0.1", 9)]);
    let discovery = Arc::new(ServiceDiscovery::new(Arc::new(registry)));
    let transport = Arc::new(ReqwestTransport::new(Duration::from_secs(1)).unwrap());
    let client = ResilientClient::new(
        discovery,
        transport,
        CircuitBreakerConfig::default(),
        fast_retry_config(),
    );

    match client.get("users", "/api/users").await {
        Err(MeshError::RetriesExhausted { attempts, last, .. }) => {
            assert_eq!(attempts, 4);
            assert!(matches!(*last, MeshError::Transport(_)));
        }
        other => panic!("expected RetriesExhausted, got {:?}", other),
    }
    assert_eq!(client.breaker_for("users").failure_count(), 1);
}

#[tokio::test]
async fn test_registered_instance_serves_calls_through_in_memory_registry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/users/7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": 7,
            "name": "Grace"
        })))
        .mount(&server)
        .await;

    let registry = Arc::new(InMemoryRegistry::with_probe(Arc::new(MockHealthProbe::new(true))));
    let discovery = Arc::new(ServiceDiscovery::new(registry));
    let endpoint = endpoint_of(&server);
    discovery
        .register("users", &endpoint.address, endpoint.port, "/health")
        .await
        .unwrap();
    settle().await;

    let config = MeshConfig {
        retry: fast_retry_config(),
        ..MeshConfig::default()
    };
    let transport = Arc::new(ReqwestTransport::new(config.request_timeout).unwrap());
    let client = ResilientClient::from_config(discovery.clone(), transport, &config);

    let user: User = client.get_json("users", "/api/users/7").await.unwrap();
    assert_eq!(user.name, "Grace");

    discovery.shutdown().await.unwrap();
    assert!(matches!(
        client.get("users", "/api/users/7").await,
        Err(MeshError::ServiceNotFound(_))
    ));
}
