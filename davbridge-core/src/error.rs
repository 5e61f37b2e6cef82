//! Top-level error types for davbridge.

use thiserror::Error;

use crate::authenticator::AuthError;
use crate::crypto::CryptoError;
use crate::secret::KeyFormatError;
use crate::upstream::UpstreamError;
use crate::vault::VaultError;

/// Top-level error type encompassing all davbridge errors.
#[derive(Debug, Error)]
pub enum DavbridgeError {
    /// Error from vault operations.
    #[error("vault error: {0}")]
    Vault(#[from] VaultError),

    /// Error from the upstream client.
    #[error("upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    /// Error from session establishment.
    #[error("authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Error from encryption or hashing.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// A bridge password was not in the expected format.
    #[error("invalid bridge password: {0}")]
    KeyFormat(#[from] KeyFormatError),

    /// Configuration error.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// Generic internal error.
    #[error("internal error: {message}")]
    Internal { message: String },
}
