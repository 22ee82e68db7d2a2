//! Provider abstraction for authenticated inference clients
//!
//! Defines the seams the client pool builds on:
//! - `ProviderId` names an upstream inference vendor
//! - `ProviderClient` is an opaque, closable, credential-bearing client handle
//! - `ClientFactory` performs the (possibly slow) network/auth setup that
//!   produces a client for one (provider, credential) pair
//!
//! `HttpClientFactory` is the production factory: one `reqwest::Client` per
//! credential with the provider's auth headers baked in.

pub mod http;

pub use http::{HttpClient, HttpClientFactory, HttpFactoryConfig};

use common::Secret;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;

/// Upstream inference vendor.
///
/// Ordering is derived so pool keys have a deterministic total order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    OpenAi,
    Anthropic,
}

impl ProviderId {
    /// Stable label for logs, metrics and config keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::OpenAi => "openai",
            ProviderId::Anthropic => "anthropic",
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when parsing an unrecognised provider name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown provider: {0}")]
pub struct UnknownProvider(pub String);

impl FromStr for ProviderId {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(ProviderId::OpenAi),
            "anthropic" => Ok(ProviderId::Anthropic),
            other => Err(UnknownProvider(other.to_string())),
        }
    }
}

/// Errors from client construction and teardown.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Credential rejected by the provider (or unusable as a header value)
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Network failure or unexpected upstream response during setup
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("client already closed")]
    Closed,

    #[error("internal provider error: {0}")]
    Internal(String),
}

/// Result alias for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// A constructed, authenticated client for one provider.
///
/// The pool shares handles with callers via `Arc`, so all methods take `&self`.
/// `close` releases the underlying connection pool; calling it more than once
/// must be harmless.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility.
pub trait ProviderClient: Send + Sync + 'static {
    fn provider(&self) -> ProviderId;

    fn close(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Builds provider clients from raw credentials.
///
/// This is the only place slow network or authentication I/O happens on the
/// acquisition path, so callers must never hold a lock across `create`.
pub trait ClientFactory: Send + Sync + 'static {
    type Client: ProviderClient;

    fn create<'a>(
        &'a self,
        provider: ProviderId,
        credential: &'a Secret<String>,
    ) -> Pin<Box<dyn Future<Output = Result<Self::Client>> + Send + 'a>>;
}
