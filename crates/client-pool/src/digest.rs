//! Credential hashing
//!
//! Pool keys carry a SHA-256 digest of the credential instead of the
//! credential itself. The digest is only ever used for indexing; nothing in
//! the pool can recover the raw value from it.

use std::fmt;

use common::Secret;
use sha2::{Digest, Sha256};

/// Digest length in bytes (SHA-256).
pub const DIGEST_LEN: usize = 32;

/// Hex characters shown in logs and Debug output.
const SHORT_HEX_LEN: usize = 12;

/// Fixed-size, irreversible fingerprint of a credential.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CredentialDigest([u8; DIGEST_LEN]);

impl CredentialDigest {
    /// Hash a credential.
    pub fn of(credential: &Secret<String>) -> Self {
        let hash = Sha256::digest(credential.expose().as_bytes());
        let mut bytes = [0u8; DIGEST_LEN];
        bytes.copy_from_slice(&hash);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    /// Full lowercase hex encoding.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Truncated hex prefix for log fields.
    pub fn short(&self) -> String {
        let mut hex = self.to_hex();
        hex.truncate(SHORT_HEX_LEN);
        hex
    }
}

impl fmt::Debug for CredentialDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CredentialDigest({})", self.short())
    }
}

impl fmt::Display for CredentialDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}
