//! Coordinator: the mutable shell around `PoolState`
//!
//! One `tokio::sync::Mutex` guards the state, and it is only ever held across
//! the pure transitions in `state.rs`. Client construction (the factory) and
//! client teardown (`close`) always run with the lock released, so a slow
//! handshake for one credential never stalls callers using other credentials.
//!
//! Acquisition:
//! 1. Purge expired entries; reuse the entry if the key is live
//! 2. Otherwise close whatever the purge released, then build a client with
//!    the lock released
//! 3. Re-lock, purge again, and re-check the key: a concurrent caller may have
//!    registered it first, in which case the freshly built client is closed
//! 4. Insert, evict over-capacity entries, unlock, close everything released

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use common::Secret;
use provider::{ClientFactory, ProviderClient, ProviderId};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, MonotonicClock};
use crate::error::{Error, Result};
use crate::metrics::{self, RemovalReason};
use crate::state::{
    PoolConfig, PoolKey, PoolState, Released, evict_excess_sparing, insert_entry, purge_expired,
    record_use,
};

/// Point-in-time pool statistics for health reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub entries: usize,
    pub max_entries: usize,
    pub ttl_secs: u64,
    pub created: u64,
    pub reused: u64,
    pub expired: u64,
    pub evicted: u64,
    pub lost_races: u64,
    pub close_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    created: AtomicU64,
    reused: AtomicU64,
    expired: AtomicU64,
    evicted: AtomicU64,
    lost_races: AtomicU64,
    close_failures: AtomicU64,
}

/// Bounded, TTL- and LRU-governed cache of provider clients keyed by
/// (provider, credential digest).
///
/// Handles returned by `acquire` are shared with the pool: callers must not
/// close them, and a handle may be closed by the pool once its entry expires
/// or is evicted.
pub struct ClientPool<F: ClientFactory> {
    factory: F,
    clock: Arc<dyn Clock>,
    state: Mutex<PoolState<F::Client>>,
    counters: Counters,
}

impl<F: ClientFactory> ClientPool<F> {
    /// Create an empty pool. Rejects a zero TTL or zero capacity.
    pub fn new(factory: F, config: PoolConfig) -> Result<Self> {
        config.validate()?;
        info!(
            ttl_secs = config.ttl.as_secs(),
            max_entries = config.max_entries,
            "client pool initialized"
        );
        Ok(Self {
            factory,
            clock: Arc::new(MonotonicClock),
            state: Mutex::new(PoolState::new(config)),
            counters: Counters::default(),
        })
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Get a client for `(provider, credential)`, building one if needed.
    ///
    /// Errors: `CredentialEmpty` for an empty/blank credential (checked before
    /// hashing), `Creation` if the factory fails. A failed creation leaves the
    /// pool unchanged apart from expiry purging.
    ///
    /// Cancel-safe: if the returned future is dropped part-way, clients already
    /// removed from the pool (and a built client not yet registered) are still
    /// closed, on a spawned task.
    pub async fn acquire(
        &self,
        provider: ProviderId,
        credential: &Secret<String>,
    ) -> Result<Arc<F::Client>> {
        if credential.is_blank() {
            return Err(Error::CredentialEmpty);
        }
        let key = PoolKey::new(provider, credential);
        let mut to_close = PendingClose::new();

        let existing = {
            let mut state = self.state.lock().await;
            let now = self.clock.now();
            self.purge_locked(&mut state, now, &mut to_close);

            let hit = state.get(&key).map(|entry| Arc::clone(&entry.client));
            if hit.is_some() {
                *state = record_use(&state, &key, now);
            }
            hit
        };

        if let Some(client) = existing {
            self.counters.reused.fetch_add(1, Ordering::Relaxed);
            metrics::record_reused(provider);
            debug!(provider = %provider, digest = %key.digest.short(), "reusing pooled client");
            self.close_pending(&mut to_close).await;
            return Ok(client);
        }

        // Expired entries are already out of the pool; close them before the build
        self.close_pending(&mut to_close).await;

        debug!(provider = %provider, digest = %key.digest.short(), "building new client");
        let built = match self.factory.create(provider, credential).await {
            Ok(client) => Arc::new(client),
            Err(source) => {
                warn!(provider = %provider, digest = %key.digest.short(), error = %source, "client creation failed");
                return Err(Error::Creation { provider, source });
            }
        };
        let mut unclaimed = PendingClose::new();
        unclaimed.push(Arc::clone(&built));

        let (client, lost_race) = {
            let mut state = self.state.lock().await;
            let now = self.clock.now();
            self.purge_locked(&mut state, now, &mut to_close);

            let current = state.get(&key).map(|entry| Arc::clone(&entry.client));
            match current {
                Some(winner) => {
                    *state = record_use(&state, &key, now);
                    (winner, true)
                }
                None => match insert_entry(&state, key, Arc::clone(&built), now) {
                    Ok(inserted) => {
                        let (trimmed, evicted) = evict_excess_sparing(&inserted, &key);
                        *state = trimmed;
                        unclaimed.disarm();
                        self.counters
                            .evicted
                            .fetch_add(evicted.len() as u64, Ordering::Relaxed);
                        metrics::record_removed(RemovalReason::Evicted, evicted.len());
                        if !evicted.is_empty() {
                            debug!(evicted = evicted.len(), "evicted least recently used clients");
                        }
                        to_close.extend(evicted);
                        metrics::set_entries(state.len());
                        (built, false)
                    }
                    Err(conflict) => {
                        // Presence was checked under this same guard
                        error!(error = %conflict, "pool invariant violated on insert");
                        debug_assert!(false, "{conflict}");
                        match state.get(&key) {
                            Some(entry) => (Arc::clone(&entry.client), true),
                            None => {
                                unclaimed.disarm();
                                (built, false)
                            }
                        }
                    }
                },
            }
        };

        if lost_race {
            self.counters.lost_races.fetch_add(1, Ordering::Relaxed);
            metrics::record_removed(RemovalReason::LostRace, 1);
            debug!(provider = %provider, digest = %key.digest.short(), "lost creation race, discarding built client");
            self.close_pending(&mut unclaimed).await;
            self.counters.reused.fetch_add(1, Ordering::Relaxed);
            metrics::record_reused(provider);
        } else {
            self.counters.created.fetch_add(1, Ordering::Relaxed);
            metrics::record_created(provider);
            info!(provider = %provider, digest = %key.digest.short(), "pooled new client");
        }

        self.close_pending(&mut to_close).await;
        Ok(client)
    }

    /// Purge expired entries now and close them. Returns how many were removed.
    ///
    /// Acquisition purges on its own; this lets a background sweeper release
    /// idle credential-bearing clients even when no traffic arrives.
    pub async fn purge(&self) -> usize {
        let mut to_close = PendingClose::new();
        {
            let mut state = self.state.lock().await;
            let now = self.clock.now();
            self.purge_locked(&mut state, now, &mut to_close);
        }
        let removed = to_close.len();
        self.close_pending(&mut to_close).await;
        removed
    }

    /// Drain the pool and close every client.
    ///
    /// Meant to run once from the host's shutdown path; later calls find an
    /// empty pool and do no client work.
    pub async fn shutdown(&self) {
        let drained = {
            let mut state = self.state.lock().await;
            let empty = state.emptied();
            std::mem::replace(&mut *state, empty)
        };
        metrics::set_entries(0);

        if drained.is_empty() {
            debug!("client pool already empty at shutdown");
            return;
        }

        let mut released = PendingClose::new();
        released.extend(drained.into_entries());
        info!(clients = released.len(), "closing pooled clients on shutdown");
        metrics::record_removed(RemovalReason::Shutdown, released.len());
        self.close_pending(&mut released).await;
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Keys currently live, for diagnostics. Contains digests only.
    pub async fn keys(&self) -> Vec<PoolKey> {
        let state = self.state.lock().await;
        let mut keys: Vec<PoolKey> = state.keys().copied().collect();
        keys.sort();
        keys
    }

    pub async fn stats(&self) -> PoolStats {
        let (entries, config) = {
            let state = self.state.lock().await;
            (state.len(), state.config())
        };
        PoolStats {
            entries,
            max_entries: config.max_entries,
            ttl_secs: config.ttl.as_secs(),
            created: self.counters.created.load(Ordering::Relaxed),
            reused: self.counters.reused.load(Ordering::Relaxed),
            expired: self.counters.expired.load(Ordering::Relaxed),
            evicted: self.counters.evicted.load(Ordering::Relaxed),
            lost_races: self.counters.lost_races.load(Ordering::Relaxed),
            close_failures: self.counters.close_failures.load(Ordering::Relaxed),
        }
    }

    /// Apply `purge_expired` to the guarded state, collecting victims.
    fn purge_locked(
        &self,
        state: &mut PoolState<F::Client>,
        now: tokio::time::Instant,
        to_close: &mut PendingClose<F::Client>,
    ) {
        let (purged, expired) = purge_expired(state, now);
        *state = purged;
        if expired.is_empty() {
            return;
        }
        debug!(expired = expired.len(), "purged expired clients");
        self.counters
            .expired
            .fetch_add(expired.len() as u64, Ordering::Relaxed);
        metrics::record_removed(RemovalReason::Expired, expired.len());
        metrics::set_entries(state.len());
        to_close.extend(expired);
    }

    /// Close pending clients one at a time. Each client is taken off the list
    /// before its close starts, so none is closed twice.
    async fn close_pending(&self, pending: &mut PendingClose<F::Client>) {
        while let Some(client) = pending.pop() {
            self.close_client(&client).await;
        }
    }

    /// Best-effort close. Failures are logged and counted, never returned.
    async fn close_client(&self, client: &F::Client) {
        if let Err(e) = client.close().await {
            let provider = client.provider();
            self.counters.close_failures.fetch_add(1, Ordering::Relaxed);
            metrics::record_close_failure(provider);
            warn!(provider = %provider, error = %e, "failed to close client");
        }
    }
}

/// Clients removed from the pool (or built but not yet registered) that still
/// need closing.
///
/// Dropping a non-empty list, which happens when an `acquire` future is
/// cancelled between removal and close, hands the remainder to a spawned task.
struct PendingClose<C: ProviderClient> {
    clients: Vec<Arc<C>>,
}

impl<C: ProviderClient> PendingClose<C> {
    fn new() -> Self {
        Self {
            clients: Vec::new(),
        }
    }

    fn push(&mut self, client: Arc<C>) {
        self.clients.push(client);
    }

    fn extend(&mut self, released: Released<C>) {
        self.clients
            .extend(released.into_iter().map(|(_, entry)| entry.client));
    }

    fn pop(&mut self) -> Option<Arc<C>> {
        self.clients.pop()
    }

    fn len(&self) -> usize {
        self.clients.len()
    }

    /// Ownership passed to the pool; nothing left to close.
    fn disarm(&mut self) {
        self.clients.clear();
    }
}

impl<C: ProviderClient> Drop for PendingClose<C> {
    fn drop(&mut self) {
        if self.clients.is_empty() {
            return;
        }
        let clients = std::mem::take(&mut self.clients);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!(clients = clients.len(), "closing released clients after cancellation");
                handle.spawn(async move {
                    for client in clients {
                        if let Err(e) = client.close().await {
                            metrics::record_close_failure(client.provider());
                            warn!(provider = %client.provider(), error = %e, "failed to close client");
                        }
                    }
                });
            }
            Err(_) => {
                warn!(clients = clients.len(), "no runtime available, released clients dropped unclosed");
            }
        }
    }
}
