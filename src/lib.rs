// library entry
pub mod config;
pub mod discovery;
pub mod error;
pub mod logging;
pub mod resilience;
pub mod transport;

#[cfg(test)]
mod test_utils;
#[cfg(test)]
mod tests;

// Re-export key components for convenience
pub use config::MeshConfig;
pub use discovery::{Endpoint, ServiceDiscovery, ServiceRegistration, ServiceRegistry};
pub use error::{MeshError, Result, TransportError};
pub use logging::init as init_logging;
pub use resilience::{CircuitBreaker, CircuitState, ResilientClient, RetryPolicy};
pub use transport::{Method, ServiceRequest, ServiceResponse, Transport};
