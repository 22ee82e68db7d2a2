//! Error types for pool operations

use provider::{ProviderError, ProviderId};

use crate::state::PoolKey;

/// Errors surfaced by the pool's public operations.
///
/// `acquire` only ever returns `CredentialEmpty` or `Creation`; close failures
/// are logged and counted, never propagated.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("credential must not be empty")]
    CredentialEmpty,

    #[error("failed to create {provider} client: {source}")]
    Creation {
        provider: ProviderId,
        #[source]
        source: ProviderError,
    },

    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),
}

/// Result alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;

/// `insert_entry` was called for a key that is already live.
///
/// Indicates a sequencing bug in the caller; never expected at runtime.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("pool key already present: {0:?}")]
pub struct ConflictError(pub PoolKey);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creation_error_names_provider_and_cause() {
        let err = Error::Creation {
            provider: ProviderId::Anthropic,
            source: ProviderError::Auth("401".into()),
        };
        assert_eq!(
            err.to_string(),
            "failed to create anthropic client: authentication failed: 401"
        );
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn credential_empty_display() {
        assert_eq!(
            Error::CredentialEmpty.to_string(),
            "credential must not be empty"
        );
    }
}
