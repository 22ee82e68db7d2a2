//! Pool state and pure transitions
//!
//! `PoolState` is the whole pool as one value. Every transition takes the
//! current state by reference and returns the next state plus the entries it
//! dropped; the caller (the coordinator in `pool.rs`) owns locking and closes
//! whatever comes back. Nothing here performs I/O or reads the clock.
//!
//! Per-key lifecycle:
//! - absent → live (`insert_entry`)
//! - live → live (`record_use`)
//! - live → absent (`purge_expired`, `evict_excess`, shutdown drain)

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use common::Secret;
use provider::ProviderId;
use tokio::time::Instant;

use crate::digest::CredentialDigest;
use crate::error::{ConflictError, Error, Result};

/// Default idle TTL (15 minutes).
pub const DEFAULT_TTL: Duration = Duration::from_secs(900);

/// Default capacity.
pub const DEFAULT_MAX_ENTRIES: usize = 128;

/// Identity of a pool slot.
///
/// Field order gives the derived `Ord` used to break eviction ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PoolKey {
    pub provider: ProviderId,
    pub digest: CredentialDigest,
}

impl PoolKey {
    pub fn new(provider: ProviderId, credential: &Secret<String>) -> Self {
        Self {
            provider,
            digest: CredentialDigest::of(credential),
        }
    }
}

/// A live client plus its bookkeeping timestamps.
#[derive(Debug)]
pub struct PoolEntry<C> {
    pub client: Arc<C>,
    pub created_at: Instant,
    pub last_used: Instant,
}

impl<C> Clone for PoolEntry<C> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            created_at: self.created_at,
            last_used: self.last_used,
        }
    }
}

/// Expiry and capacity policy, fixed for the pool's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum idle time before an entry is purged
    pub ttl: Duration,
    /// Maximum number of live entries
    pub max_entries: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> Result<()> {
        if self.ttl.is_zero() {
            return Err(Error::InvalidConfig("ttl must be greater than 0".into()));
        }
        if self.max_entries == 0 {
            return Err(Error::InvalidConfig(
                "max_entries must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// Entries dropped by a transition, paired with their keys. The caller must
/// close each client.
pub type Released<C> = Vec<(PoolKey, PoolEntry<C>)>;

/// Snapshot of the entire pool.
#[derive(Debug)]
pub struct PoolState<C> {
    entries: HashMap<PoolKey, PoolEntry<C>>,
    config: PoolConfig,
}

impl<C> Clone for PoolState<C> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
            config: self.config,
        }
    }
}

impl<C> PoolState<C> {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            entries: HashMap::new(),
            config,
        }
    }

    /// An empty state carrying the same configuration.
    pub fn emptied(&self) -> Self {
        Self::new(self.config)
    }

    pub fn config(&self) -> PoolConfig {
        self.config
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &PoolKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &PoolKey) -> Option<&PoolEntry<C>> {
        self.entries.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &PoolKey> {
        self.entries.keys()
    }

    /// Consume the state, yielding every entry (used by the shutdown drain).
    pub fn into_entries(self) -> Released<C> {
        self.entries.into_iter().collect()
    }
}

/// Drop every entry idle for longer than the TTL.
///
/// An entry used exactly `ttl` ago is kept. Pure: no I/O.
pub fn purge_expired<C>(state: &PoolState<C>, now: Instant) -> (PoolState<C>, Released<C>) {
    let ttl = state.config.ttl;
    let mut next = state.clone();
    let expired: Vec<PoolKey> = next
        .entries
        .iter()
        .filter(|(_, entry)| now.saturating_duration_since(entry.last_used) > ttl)
        .map(|(key, _)| *key)
        .collect();

    let released = expired
        .into_iter()
        .filter_map(|key| next.entries.remove(&key).map(|entry| (key, entry)))
        .collect();
    (next, released)
}

/// Refresh `last_used` for a live key. An absent key leaves the state unchanged.
pub fn record_use<C>(state: &PoolState<C>, key: &PoolKey, now: Instant) -> PoolState<C> {
    let mut next = state.clone();
    if let Some(entry) = next.entries.get_mut(key) {
        entry.last_used = now;
    }
    next
}

/// Register a freshly built client under an absent key.
///
/// Fails with `ConflictError` if the key is already live; the caller is
/// expected to have checked presence under the same lock.
pub fn insert_entry<C>(
    state: &PoolState<C>,
    key: PoolKey,
    client: Arc<C>,
    now: Instant,
) -> std::result::Result<PoolState<C>, ConflictError> {
    if state.contains(&key) {
        return Err(ConflictError(key));
    }
    let mut next = state.clone();
    next.entries.insert(
        key,
        PoolEntry {
            client,
            created_at: now,
            last_used: now,
        },
    );
    Ok(next)
}

/// Evict least-recently-used entries until the pool is within capacity.
///
/// Victims are ordered by `last_used`, then `created_at`, then key.
pub fn evict_excess<C>(state: &PoolState<C>) -> (PoolState<C>, Released<C>) {
    evict_lru(state, None)
}

/// Like `evict_excess`, but never picks `keep`.
///
/// The coordinator uses this right after an insert so the entry it is about to
/// hand out cannot lose a timestamp tie and be evicted unclosed.
pub fn evict_excess_sparing<C>(
    state: &PoolState<C>,
    keep: &PoolKey,
) -> (PoolState<C>, Released<C>) {
    evict_lru(state, Some(keep))
}

fn evict_lru<C>(state: &PoolState<C>, keep: Option<&PoolKey>) -> (PoolState<C>, Released<C>) {
    let excess = state.len().saturating_sub(state.config.max_entries);
    if excess == 0 {
        return (state.clone(), Vec::new());
    }

    let mut candidates: Vec<(Instant, Instant, PoolKey)> = state
        .entries
        .iter()
        .filter(|(key, _)| Some(*key) != keep)
        .map(|(key, entry)| (entry.last_used, entry.created_at, *key))
        .collect();
    candidates.sort_unstable();

    let mut next = state.clone();
    let released = candidates
        .into_iter()
        .take(excess)
        .filter_map(|(_, _, key)| next.entries.remove(&key).map(|entry| (key, entry)))
        .collect();
    (next, released)
}
