// src/discovery/consul.rs

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use crate::config::ConsulConfig;
use crate::discovery::{Endpoint, ServiceRegistration, ServiceRegistry};
use crate::error::{MeshError, Result};

/// Registry backend talking to a local Consul agent over its HTTP API
#[derive(Debug, Clone)]
pub struct ConsulRegistry {
    client: Client,
    base_url: Url,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct AgentServiceRegistration<'a> {
    #[serde(rename = "ID")]
    id: &'a str,
    name: &'a str,
    address: &'a str,
    port: u16,
    check: AgentServiceCheck,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct AgentServiceCheck {
    #[serde(rename = "HTTP")]
    http: String,
    interval: String,
    timeout: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    deregister_critical_service_after: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ServiceEntry {
    node: NodeInfo,
    service: AgentService,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NodeInfo {
    #[serde(default)]
    address: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AgentService {
    #[serde(default)]
    address: String,
    port: u16,
}

impl ConsulRegistry {
    pub fn new(config: &ConsulConfig) -> Result<Self> {
        let base_url = Url::parse(&config.address)
            .map_err(|e| MeshError::Config(format!("invalid Consul address '{}': {}", config.address, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(MeshError::Config(format!(
                "invalid Consul address '{}': not an HTTP base URL",
                config.address
            )));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| MeshError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { client, base_url })
    }

    /// API URL under the configured address; each segment is percent-encoded
    /// and any path prefix on the address is kept
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| MeshError::Config(format!("Consul address '{}' cannot hold a path", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

/// Render a duration the way Consul (Go) parses it
fn go_duration(duration: Duration) -> String {
    if duration.subsec_millis() == 0 {
        format!("{}s", duration.as_secs())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

#[async_trait]
impl ServiceRegistry for ConsulRegistry {
    async fn register(&self, registration: &ServiceRegistration) -> Result<()> {
        let body = AgentServiceRegistration {
            id: &registration.id,
            name: &registration.name,
            address: &registration.address,
            port: registration.port,
            check: AgentServiceCheck {
                http: registration.health_check_target(),
                interval: go_duration(registration.check_interval),
                timeout: go_duration(registration.check_timeout),
                deregister_critical_service_after: registration
                    .deregister_critical_after
                    .map(go_duration),
            },
        };

        let url = self.endpoint(&["v1", "agent", "service", "register"])?;
        let response = self
            .client
            .put(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| MeshError::Registration(format!("Consul agent unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(MeshError::Registration(format!(
                "Consul rejected registration of '{}' ({}): {}",
                registration.id, status, text
            )));
        }

        info!(id = %registration.id, service = %registration.name, "Registered with Consul");
        Ok(())
    }

    async fn deregister(&self, service_id: &str) -> Result<()> {
        let url = self.endpoint(&["v1", "agent", "service", "deregister", service_id])?;
        let response = self
            .client
            .put(url)
            .send()
            .await
            .map_err(|e| MeshError::Registry(format!("Consul agent unreachable: {}", e)))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!(id = service_id, "Consul does not know this id, nothing to deregister");
            return Ok(());
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(MeshError::Registry(format!(
                "Consul failed to deregister '{}' ({}): {}",
                service_id, status, text
            )));
        }

        info!(id = service_id, "Deregistered from Consul");
        Ok(())
    }

    async fn query_healthy(&self, name: &str) -> Result<Vec<Endpoint>> {
        let mut url = self.endpoint(&["v1", "health", "service", name])?;
        url.query_pairs_mut().append_pair("passing", "true");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| MeshError::Registry(format!("Consul agent unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MeshError::Registry(format!(
                "Consul health query for '{}' failed with {}",
                name, status
            )));
        }

        let entries: Vec<ServiceEntry> = response
            .json()
            .await
            .map_err(|e| MeshError::Registry(format!("malformed Consul health response: {}", e)))?;

        Ok(entries
            .into_iter()
            .map(|entry| {
                // an empty service address means "same as the node"
                let address = if entry.service.address.is_empty() {
                    entry.node.address
                } else {
                    entry.service.address
                };
                Endpoint::new(address, entry.service.port)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_go_duration_formatting() {
        assert_eq!(go_duration(Duration::from_secs(10)), "10s");
        assert_eq!(go_duration(Duration::from_millis(1500)), "1500ms");
    }

    fn registry(address: &str) -> ConsulRegistry {
        ConsulRegistry::new(&ConsulConfig {
            address: address.to_string(),
            timeout: Duration::from_secs(1),
        })
        .unwrap()
    }

    #[test]
    fn test_endpoint_keeps_address_prefix() {
        let url = registry("http://gateway:8080/consul")
            .endpoint(&["v1", "agent", "service", "register"])
            .unwrap();
        assert_eq!(url.as_str(), "http://gateway:8080/consul/v1/agent/service/register");

        let url = registry("http://localhost:8500/")
            .endpoint(&["v1", "health", "service", "orders"])
            .unwrap();
        assert_eq!(url.as_str(), "http://localhost:8500/v1/health/service/orders");
    }

    #[test]
    fn test_endpoint_escapes_service_name() {
        let url = registry("http://localhost:8500")
            .endpoint(&["v1", "health", "service", "orders?x=1#frag"])
            .unwrap();
        assert_eq!(url.path(), "/v1/health/service/orders%3Fx=1%23frag");
        assert_eq!(url.query(), None);
        assert_eq!(url.fragment(), None);
    }

    #[test]
    fn test_non_base_address_is_rejected() {
        let result = ConsulRegistry::new(&ConsulConfig {
            address: "mailto:ops@example.com".to_string(),
            timeout: Duration::from_secs(1),
        });
        assert!(matches!(result, Err(MeshError::Config(_))));
    }
}
