//! Host lifecycle errors

use thiserror::Error;

/// Failures that stop the host before it starts serving.
///
/// Runtime pool errors never reach this level: the pool contains its own
/// bookkeeping failures and `acquire` errors belong to the application layer.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Pool(#[from] client_pool::Error),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },
}
