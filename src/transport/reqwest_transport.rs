// src/transport/reqwest_transport.rs

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use crate::error::{MeshError, Result, TransportError};
use crate::transport::{Method, ServiceRequest, ServiceResponse, Transport};

/// Plain HTTP transport backed by a pooled `reqwest::Client`
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
    timeout: Duration,
}

impl ReqwestTransport {
    /// Build a transport whose requests give up after `timeout`
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .user_agent(concat!("resilient-mesh/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| MeshError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { client, timeout })
    }

    /// Wrap an existing client
    pub fn from_client(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: ServiceRequest) -> Result<ServiceResponse> {
        debug!(method = %request.method, url = %request.url, "Sending request");

        let builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self
                .client
                .post(&request.url)
                .header(CONTENT_TYPE, "application/json")
                .body(request.body.unwrap_or_default()),
        };

        let response = builder.send().await.map_err(|e| match MeshError::from(e) {
            MeshError::Transport(TransportError::Timeout(_)) => {
                MeshError::Transport(TransportError::Timeout(self.timeout))
            }
            other => other,
        })?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| MeshError::Transport(TransportError::Other(e.to_string())))?;

        Ok(ServiceResponse::new(status, body.to_vec()))
    }
}
