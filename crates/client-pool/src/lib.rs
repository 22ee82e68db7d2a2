//! Bounded pool of authenticated provider clients
//!
//! Caches one client per (provider, credential digest) so callers reuse
//! connection pools and auth setup instead of rebuilding them per request.
//! Entries leave the pool on idle expiry (TTL), on least-recently-used
//! eviction once `max_entries` is exceeded, or on shutdown; every removal
//! path closes the client.
//!
//! Layout:
//! - `digest` — SHA-256 credential fingerprints used in pool keys
//! - `state` — `PoolState` value and the pure transitions over it
//! - `pool` — `ClientPool`, the locking coordinator exposing `acquire`/`shutdown`
//! - `sweep` — optional background purge task
//! - `clock` / `metrics` — monotonic time source and metric emission

pub mod clock;
pub mod digest;
pub mod error;
pub mod metrics;
pub mod pool;
pub mod state;
pub mod sweep;

pub use clock::{Clock, MonotonicClock};
pub use digest::CredentialDigest;
pub use error::{ConflictError, Error, Result};
pub use pool::{ClientPool, PoolStats};
pub use state::{PoolConfig, PoolEntry, PoolKey, PoolState};
pub use sweep::spawn_sweeper;
