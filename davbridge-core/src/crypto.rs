//! Authenticated encryption and secret verification.
//!
//! - [`seal`] / [`open`] wrap arbitrary bytes with XChaCha20-Poly1305 under a
//!   [`SecretKey`]. The output is `base64(nonce || ciphertext || tag)` with a
//!   fresh 24-byte random nonce per call.
//! - [`pad`] rounds a serialized record up to a [`PADDING_BLOCK`] multiple so
//!   the stored entry length only reveals a coarse size bucket.
//! - [`SecretVerifier`] is a salted Argon2id hash of a key, used to check warm
//!   requests without keeping the key itself.

use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, AeadCore, KeyInit},
};
use thiserror::Error;

use crate::secret::SecretKey;

/// Nonce length for XChaCha20-Poly1305.
pub const NONCE_LEN: usize = 24;

/// Poly1305 authentication tag length.
pub const TAG_LEN: usize = 16;

/// Serialized records are padded to a multiple of this many bytes.
pub const PADDING_BLOCK: usize = 256;

/// Error type for cryptographic operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The entry is malformed, truncated, or fails authentication.
    ///
    /// Carries no detail, so a wrong key and a corrupted entry
    /// look the same.
    #[error("decryption error")]
    Decryption,

    /// Encryption could not be performed.
    #[error("encryption error: {message}")]
    Encryption { message: String },

    /// Verifier hashing failed.
    #[error("hash error: {message}")]
    Hash { message: String },
}

fn cipher(key: &SecretKey) -> Result<XChaCha20Poly1305, CryptoError> {
    XChaCha20Poly1305::new_from_slice(key.as_bytes()).map_err(|e| CryptoError::Encryption {
        message: format!("invalid key length: {}", e),
    })
}

/// Encrypt `plaintext` under `key`.
pub fn seal(plaintext: &[u8], key: &SecretKey) -> Result<String, CryptoError> {
    let aead = cipher(key)?;
    let nonce = XChaCha20Poly1305::generate_nonce(&mut chacha20poly1305::aead::OsRng);

    let ciphertext = aead
        .encrypt(&nonce, plaintext)
        .map_err(|e| CryptoError::Encryption {
            message: e.to_string(),
        })?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    Ok(STANDARD.encode(sealed))
}

/// Decrypt an entry produced by [`seal`].
///
/// Fails closed: no plaintext is returned unless the tag verifies.
pub fn open(entry: &str, key: &SecretKey) -> Result<Vec<u8>, CryptoError> {
    let sealed = STANDARD
        .decode(entry.as_bytes())
        .map_err(|_| CryptoError::Decryption)?;

    if sealed.len() < NONCE_LEN + TAG_LEN {
        return Err(CryptoError::Decryption);
    }

    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
    cipher(key)?
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::Decryption)
}

/// Length of a `len`-byte record once padded.
pub fn padded_len(len: usize) -> usize {
    len.div_ceil(PADDING_BLOCK).max(1) * PADDING_BLOCK
}

/// Pad serialized JSON in place with trailing whitespace up to the next
/// block boundary.
///
/// JSON parsers ignore trailing whitespace, so padded records deserialize
/// unchanged. A buffer allocated with [`padded_len`] capacity is never
/// reallocated.
pub fn pad(json: &mut Vec<u8>) {
    json.resize(padded_len(json.len()), b' ');
}

/// One-way verifier of a [`SecretKey`], stored as an Argon2id PHC string.
#[derive(Clone)]
pub struct SecretVerifier(String);

impl SecretVerifier {
    /// Hash `key` with a fresh random salt.
    ///
    /// Uses Argon2id with OWASP recommended parameters (m=19456, t=2, p=1).
    /// CPU-bound; call [`derive_blocking`](Self::derive_blocking) from async code.
    pub fn derive(key: &SecretKey) -> Result<Self, CryptoError> {
        let params = Params::new(19456, 2, 1, None).map_err(|e| CryptoError::Hash {
            message: format!("invalid Argon2 params: {}", e),
        })?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let salt = SaltString::generate(&mut OsRng);
        let hash = argon2
            .hash_password(key.as_bytes(), &salt)
            .map_err(|e| CryptoError::Hash {
                message: format!("verifier hashing failed: {}", e),
            })?
            .to_string();

        Ok(Self(hash))
    }

    /// Check `key` against this verifier.
    ///
    /// Parameters are read back from the stored hash.
    pub fn verify(&self, key: &SecretKey) -> bool {
        let Ok(parsed) = PasswordHash::new(&self.0) else {
            return false;
        };
        Argon2::default()
            .verify_password(key.as_bytes(), &parsed)
            .is_ok()
    }

    /// [`derive`](Self::derive) on the blocking thread pool.
    pub async fn derive_blocking(key: SecretKey) -> Result<Self, CryptoError> {
        tokio::task::spawn_blocking(move || Self::derive(&key))
            .await
            .map_err(|e| CryptoError::Hash {
                message: format!("verifier task failed: {}", e),
            })?
    }

    /// [`verify`](Self::verify) on the blocking thread pool.
    pub async fn verify_blocking(&self, key: SecretKey) -> Result<bool, CryptoError> {
        let verifier = self.clone();
        tokio::task::spawn_blocking(move || verifier.verify(&key))
            .await
            .map_err(|e| CryptoError::Hash {
                message: format!("verifier task failed: {}", e),
            })
    }

    /// The PHC string form of the verifier.
    pub fn as_phc(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SecretVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SecretVerifier").field(&"argon2id").finish()
    }
}
