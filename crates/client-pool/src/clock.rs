//! Monotonic time source
//!
//! TTL accounting never reads the wall clock. The default clock reads
//! `tokio::time::Instant`, which tests can pause and advance.

use tokio::time::Instant;

pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;
}

/// Tokio's monotonic clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}
