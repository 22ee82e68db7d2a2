//! Background expiry sweeper
//!
//! Acquisition only purges expired entries when someone calls `acquire`. The
//! sweeper runs the same purge on a fixed interval so an idle pool still
//! releases credential-bearing clients shortly after their TTL lapses.

use std::sync::Arc;
use std::time::Duration;

use provider::ClientFactory;
use tracing::{debug, info};

use crate::pool::ClientPool;

/// Spawn a task that purges expired entries every `interval`.
///
/// The host aborts the returned handle before calling `ClientPool::shutdown`.
pub fn spawn_sweeper<F: ClientFactory>(
    pool: Arc<ClientPool<F>>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    info!(interval_secs = interval.as_secs(), "starting client pool sweeper");
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // Skip the immediate first tick — nothing can have expired yet
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let removed = pool.purge().await;
            if removed > 0 {
                info!(removed, "sweeper released expired clients");
            } else {
                debug!("sweeper found no expired clients");
            }
        }
    })
}
