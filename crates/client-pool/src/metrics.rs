//! Pool metrics
//!
//! Emitted through the `metrics` facade; the host binary installs the
//! Prometheus recorder. Without a recorder every call is a no-op.
//!
//! - `client_pool_created_total` (counter): label `provider`
//! - `client_pool_reused_total` (counter): label `provider`
//! - `client_pool_removed_total` (counter): label `reason`
//! - `client_pool_close_failures_total` (counter): label `provider`
//! - `client_pool_entries` (gauge)

use provider::ProviderId;

/// Why an entry left the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    Expired,
    Evicted,
    LostRace,
    Shutdown,
}

impl RemovalReason {
    pub fn label(&self) -> &'static str {
        match self {
            RemovalReason::Expired => "expired",
            RemovalReason::Evicted => "evicted",
            RemovalReason::LostRace => "lost_race",
            RemovalReason::Shutdown => "shutdown",
        }
    }
}

pub fn record_created(provider: ProviderId) {
    metrics::counter!("client_pool_created_total", "provider" => provider.as_str()).increment(1);
}

pub fn record_reused(provider: ProviderId) {
    metrics::counter!("client_pool_reused_total", "provider" => provider.as_str()).increment(1);
}

pub fn record_removed(reason: RemovalReason, count: usize) {
    if count == 0 {
        return;
    }
    metrics::counter!("client_pool_removed_total", "reason" => reason.label())
        .increment(count as u64);
}

pub fn record_close_failure(provider: ProviderId) {
    metrics::counter!("client_pool_close_failures_total", "provider" => provider.as_str())
        .increment(1);
}

pub fn set_entries(len: usize) {
    metrics::gauge!("client_pool_entries").set(len as f64);
}
