//! Load-balancing policies over a resolved endpoint set.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt::Debug;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::discovery::Endpoint;

/// Picks one endpoint out of the healthy set
pub trait EndpointSelector: Send + Sync + Debug {
    fn select(&self, endpoints: &[Endpoint]) -> Option<Endpoint>;
}

/// Uniform random choice; no stickiness, no per-service state
#[derive(Debug)]
pub struct RandomSelector {
    rng: Mutex<StdRng>,
}

impl RandomSelector {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Deterministic sequence, for tests and reproducible simulations
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for RandomSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl EndpointSelector for RandomSelector {
    fn select(&self, endpoints: &[Endpoint]) -> Option<Endpoint> {
        if endpoints.is_empty() {
            return None;
        }

        let index = self
            .rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .random_range(0..endpoints.len());
        endpoints.get(index).cloned()
    }
}

/// Round-robin selector.
/// Stores an internal counter to rotate through endpoints.
#[derive(Debug, Default)]
pub struct RoundRobinSelector {
    counter: AtomicUsize,
}

impl RoundRobinSelector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EndpointSelector for RoundRobinSelector {
    fn select(&self, endpoints: &[Endpoint]) -> Option<Endpoint> {
        if endpoints.is_empty() {
            return None;
        }

        let index = self.counter.fetch_add(1, Ordering::Relaxed) % endpoints.len();
        endpoints.get(index).cloned()
    }
}
