// src/transport/mod.rs

pub mod reqwest_transport;

pub use reqwest_transport::ReqwestTransport;

use super::error::{MeshError, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::fmt::{self, Debug};

/// HTTP methods the mesh issues
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single outbound request against a resolved instance
#[derive(Debug, Clone)]
pub struct ServiceRequest {
    pub method: Method,
    pub url: String,
    /// JSON-encoded body
    pub body: Option<Vec<u8>>,
}

impl ServiceRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            body: None,
        }
    }

    pub fn post(url: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            body: Some(body),
        }
    }
}

/// Status and body are the only signals consumed from a response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl ServiceResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// 2xx and 3xx count as success
    pub fn is_success(&self) -> bool {
        (200..400).contains(&self.status)
    }

    /// Decode the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| MeshError::Decode(e.to_string()))
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Core trait that every transport must implement.
///
/// A transport reports only network-level failures as errors; any HTTP
/// status, including 5xx, comes back as a `ServiceResponse`.
#[async_trait]
pub trait Transport: Send + Sync + Debug {
    async fn send(&self, request: ServiceRequest) -> Result<ServiceResponse>;
}
