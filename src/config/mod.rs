// src/config/mod.rs

use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{MeshError, Result};
use crate::resilience::{CircuitBreakerConfig, RetryConfig};

/// Top-level configuration for a process taking part in the mesh
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshConfig {
    /// Registry backend connection
    #[serde(default)]
    pub consul: ConsulConfig,

    /// Breaker settings applied to every destination
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    /// Retry settings shared by all calls
    #[serde(default)]
    pub retry: RetryConfig,

    /// Lookup behaviour
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Health check settings for this process's own registration
    #[serde(default)]
    pub registration: RegistrationConfig,

    /// Deadline for a single network attempt
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            consul: ConsulConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            retry: RetryConfig::default(),
            discovery: DiscoveryConfig::default(),
            registration: RegistrationConfig::default(),
            request_timeout: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Configuration for the Consul agent backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsulConfig {
    /// Base URL of the local Consul agent
    #[serde(default = "default_consul_address")]
    pub address: String,

    /// Timeout for calls to the agent itself
    #[serde(default = "default_consul_timeout", with = "duration_serde")]
    pub timeout: Duration,
}

impl Default for ConsulConfig {
    fn default() -> Self {
        Self {
            address: default_consul_address(),
            timeout: default_consul_timeout(),
        }
    }
}

fn default_consul_address() -> String {
    "http://localhost:8500".to_string()
}

fn default_consul_timeout() -> Duration {
    Duration::from_secs(5)
}

/// How an endpoint is chosen among the healthy instances of a service
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    #[default]
    Random,
    RoundRobin,
}

impl FromStr for SelectionStrategy {
    type Err = MeshError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "random" => Ok(SelectionStrategy::Random),
            "round_robin" => Ok(SelectionStrategy::RoundRobin),
            other => Err(MeshError::Config(format!(
                "unknown selection strategy '{}'",
                other
            ))),
        }
    }
}

/// Configuration for service lookups
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// How long a resolved endpoint set may be reused; `None` disables caching
    #[serde(default, with = "option_duration_serde")]
    pub cache_ttl: Option<Duration>,

    /// Load-balancing policy
    #[serde(default)]
    pub selection: SelectionStrategy,
}

/// Health check parameters handed to the registry on registration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationConfig {
    /// How often the registry probes the health URL
    #[serde(default = "default_check_interval", with = "duration_serde")]
    pub check_interval: Duration,

    /// How long a single probe may take
    #[serde(default = "default_check_timeout", with = "duration_serde")]
    pub check_timeout: Duration,

    /// Remove the instance after it has been critical this long
    #[serde(default, with = "option_duration_serde")]
    pub deregister_critical_after: Option<Duration>,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            check_interval: default_check_interval(),
            check_timeout: default_check_timeout(),
            deregister_critical_after: None,
        }
    }
}

fn default_check_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_check_timeout() -> Duration {
    Duration::from_secs(5)
}

impl MeshConfig {
    /// Build a configuration from `MESH_*` environment variables, falling
    /// back to defaults for anything unset
    pub fn from_env() -> Result<Self> {
        let mut config = MeshConfig::default();

        if let Ok(address) = env::var("MESH_CONSUL_ADDR") {
            config.consul.address = address;
        }
        if let Some(threshold) = env_parse::<usize>("MESH_FAILURE_THRESHOLD")? {
            config.circuit_breaker.failure_threshold = threshold;
        }
        if let Some(ms) = env_parse::<u64>("MESH_OPEN_TIMEOUT_MS")? {
            config.circuit_breaker.open_timeout = Duration::from_millis(ms);
        }
        if let Some(retries) = env_parse::<usize>("MESH_MAX_RETRIES")? {
            config.retry.max_retries = retries;
        }
        if let Some(ms) = env_parse::<u64>("MESH_RETRY_INITIAL_MS")? {
            config.retry.initial_backoff = Duration::from_millis(ms);
        }
        if let Some(jitter) = env_parse::<bool>("MESH_RETRY_JITTER")? {
            config.retry.use_jitter = jitter;
        }
        if let Some(ms) = env_parse::<u64>("MESH_REQUEST_TIMEOUT_MS")? {
            config.request_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse::<u64>("MESH_DISCOVERY_CACHE_TTL_MS")? {
            config.discovery.cache_ttl = Some(Duration::from_millis(ms));
        }
        if let Some(strategy) = env_parse::<SelectionStrategy>("MESH_LB_STRATEGY")? {
            config.discovery.selection = strategy;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the resilience layer meaningless
    pub fn validate(&self) -> Result<()> {
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(MeshError::Config(
                "failure_threshold must be greater than zero".to_string(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(MeshError::Config(
                "request_timeout must be greater than zero".to_string(),
            ));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(MeshError::Config(
                "backoff_multiplier must be at least 1.0".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| MeshError::Config(format!("invalid value for {}: {}", key, e))),
        Err(_) => Ok(None),
    }
}

// Helper module to serialize/deserialize Duration with serde
pub(crate) mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

pub(crate) mod option_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}
