// src/resilience/mod.rs
//! Resilience layer for service-to-service calls.
//!
//! This module composes the patterns that govern how one service calls
//! another over an unreliable network:
//!
//! 1. **Circuit Breaking** - Fail fast per destination once it is judged unhealthy
//! 2. **Retry with Exponential Backoff** - Re-attempt transient failures a bounded number of times
//! 3. **Resilient Client** - Resolve, then call through breaker and retry policy

mod circuit_breaker;
mod clock;
mod exponential_backoff;
mod resilient_client;

#[cfg(test)]
mod tests;

// Re-export key components
pub use circuit_breaker::{Admission, BreakerSnapshot, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use clock::{Clock, SystemClock};
pub use exponential_backoff::{ExponentialBackoff, RetryConfig, RetryPolicy};
pub use resilient_client::ResilientClient;
