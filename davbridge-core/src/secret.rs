//! Secret-holding types.
//!
//! This module provides:
//! - [`Secret`] - A string wrapper for tokens and passwords that never prints its value
//! - [`SecretKey`] - The 32-byte bridge key that wraps a vault entry
//!
//! Both types zero their memory on drop.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of a [`SecretKey`] in bytes (256 bits).
pub const SECRET_KEY_LEN: usize = 32;

/// A secret value that prevents accidental exposure in logs.
///
/// The inner value is only accessible via [`expose()`](Secret::expose).
/// Debug and Display implementations show `[REDACTED]` instead of the value.
#[derive(Clone, Default, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Create a new secret from a string value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the secret value.
    ///
    /// Use sparingly and never log the result.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Whether the secret holds an empty string.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Secret([REDACTED])")
    }
}

impl std::fmt::Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Secret {}

/// Error returned when a presented bridge password is not a valid key.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyFormatError {
    /// The value is not standard base64.
    #[error("bridge password is not valid base64")]
    InvalidEncoding,

    /// The decoded value has the wrong length.
    #[error("bridge password must decode to {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

/// The symmetric key a client presents as its bridge password.
///
/// The same value decrypts the user's vault entry on a cold start and is
/// checked against an in-memory verifier on warm requests. It is never
/// persisted and never logged.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey([u8; SECRET_KEY_LEN]);

impl SecretKey {
    /// Generate a fresh key from the operating system's CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; SECRET_KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Build a key from raw bytes.
    pub fn from_bytes(bytes: [u8; SECRET_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Decode a key from its base64 bridge-password form.
    ///
    /// Anything other than standard base64 of exactly [`SECRET_KEY_LEN`]
    /// bytes is rejected.
    pub fn from_base64(encoded: &str) -> Result<Self, KeyFormatError> {
        let mut decoded = STANDARD
            .decode(encoded.as_bytes())
            .map_err(|_| KeyFormatError::InvalidEncoding)?;

        if decoded.len() != SECRET_KEY_LEN {
            let actual = decoded.len();
            decoded.zeroize();
            return Err(KeyFormatError::InvalidLength {
                expected: SECRET_KEY_LEN,
                actual,
            });
        }

        let mut bytes = [0u8; SECRET_KEY_LEN];
        bytes.copy_from_slice(&decoded);
        decoded.zeroize();
        Ok(Self(bytes))
    }

    /// Encode the key as the bridge password shown to the operator.
    pub fn to_base64(&self) -> Secret {
        Secret::new(STANDARD.encode(self.0))
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; SECRET_KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretKey([REDACTED])")
    }
}
