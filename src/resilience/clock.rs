use std::fmt::Debug;
use tokio::time::Instant;

/// Source of the current instant for time-dependent state machines
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> Instant;
}

/// Clock backed by the tokio timer, so paused test runtimes advance it too
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}
