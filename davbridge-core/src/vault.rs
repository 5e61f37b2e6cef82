//! Encrypted credential persistence.
//!
//! The vault is a single JSON object mapping each username to an encrypted
//! entry (see [`crate::crypto::seal`]). Entries are wrapped with the user's
//! bridge key, which is never written anywhere.
//!
//! # Example
//!
//! ```rust,ignore
//! use davbridge_core::{CredentialVault, SecretKey};
//!
//! let vault = CredentialVault::new("auth.json");
//! let key = SecretKey::generate();
//! let entry = CredentialVault::encrypt(&record, &key)?;
//! vault.store("alice", entry).await?;
//!
//! let entry = vault.entry("alice").await?.unwrap();
//! let record = CredentialVault::decrypt(&entry, &key)?;
//! ```

use std::collections::BTreeMap;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use tokio::sync::Mutex;
use zeroize::Zeroizing;

use crate::crypto::{self, CryptoError};
use crate::model::CredentialRecord;
use crate::secret::SecretKey;

/// Username to encrypted entry mapping, as stored on disk.
pub type VaultEntries = BTreeMap<String, String>;

/// Error type for vault operations.
#[derive(Debug, Error)]
pub enum VaultError {
    /// Encryption or decryption failed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// The vault file could not be read or written.
    #[error("vault I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A record or the vault file could not be (de)serialized.
    #[error("vault serialization error: {0}")]
    Marshal(#[from] serde_json::Error),
}

impl VaultError {
    /// Whether this error means the entry did not open under the given key.
    pub fn is_decryption(&self) -> bool {
        matches!(self, VaultError::Crypto(CryptoError::Decryption))
    }

    fn io(path: &Path, source: std::io::Error) -> Self {
        VaultError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Sink that only counts the bytes written to it.
struct ByteCounter(usize);

impl Write for ByteCounter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0 += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// File-backed store of encrypted credential records.
///
/// # Thread Safety
///
/// Reads are unsynchronized. Every write goes through a single writer lock,
/// so concurrent read-modify-write cycles for different usernames never lose
/// each other's updates.
#[derive(Debug)]
pub struct CredentialVault {
    path: PathBuf,
    write_lock: Mutex<()>,
    writes: AtomicU64,
}

impl CredentialVault {
    /// Create a vault backed by the file at `path`.
    ///
    /// The file is not touched until the first read or write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
            writes: AtomicU64::new(0),
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of completed writes through this handle.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Serialize, pad and encrypt a record under `key`.
    pub fn encrypt(record: &CredentialRecord, key: &SecretKey) -> Result<String, VaultError> {
        let cleartext = Self::serialize_padded(record)?;
        Ok(crypto::seal(&cleartext, key)?)
    }

    /// Serialize and pad `record` into one buffer sized up front, so the
    /// cleartext is never reallocated and only the zeroized copy exists.
    fn serialize_padded(record: &CredentialRecord) -> Result<Zeroizing<Vec<u8>>, VaultError> {
        let mut counter = ByteCounter(0);
        serde_json::to_writer(&mut counter, record)?;

        let mut cleartext = Zeroizing::new(Vec::with_capacity(crypto::padded_len(counter.0)));
        serde_json::to_writer(&mut *cleartext, record)?;
        crypto::pad(&mut cleartext);
        Ok(cleartext)
    }

    /// Decrypt and parse an entry produced by [`encrypt`](Self::encrypt).
    ///
    /// A wrong key, a truncated entry and a tampered entry all return
    /// [`CryptoError::Decryption`].
    pub fn decrypt(entry: &str, key: &SecretKey) -> Result<CredentialRecord, VaultError> {
        let cleartext = Zeroizing::new(crypto::open(entry, key)?);
        Ok(serde_json::from_slice(&cleartext)?)
    }

    /// Read every entry. A missing file is an empty vault.
    pub async fn load(&self) -> Result<VaultEntries, VaultError> {
        let contents = match tokio::fs::read(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(VaultEntries::new()),
            Err(e) => return Err(VaultError::io(&self.path, e)),
        };

        if contents.iter().all(u8::is_ascii_whitespace) {
            return Ok(VaultEntries::new());
        }

        Ok(serde_json::from_slice(&contents)?)
    }

    /// Atomically replace the whole vault with `entries`.
    pub async fn save(&self, entries: &VaultEntries) -> Result<(), VaultError> {
        let _guard = self.write_lock.lock().await;
        self.write_entries(entries).await
    }

    /// Look up the entry for one username.
    pub async fn entry(&self, username: &str) -> Result<Option<String>, VaultError> {
        Ok(self.load().await?.remove(username))
    }

    /// Insert or replace the entry for one username.
    pub async fn store(&self, username: &str, entry: String) -> Result<(), VaultError> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.load().await?;
        entries.insert(username.to_string(), entry);
        self.write_entries(&entries).await?;

        tracing::debug!("Stored vault entry for {}", username);
        Ok(())
    }

    /// Remove the entry for one username.
    ///
    /// Returns `false` if there was nothing to remove.
    pub async fn remove(&self, username: &str) -> Result<bool, VaultError> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.load().await?;
        if entries.remove(username).is_none() {
            return Ok(false);
        }
        self.write_entries(&entries).await?;

        tracing::info!("Removed vault entry for {}", username);
        Ok(true)
    }

    /// Enrolled usernames, in sorted order.
    pub async fn usernames(&self) -> Result<Vec<String>, VaultError> {
        Ok(self.load().await?.into_keys().collect())
    }

    /// Write `entries` to a sibling temp file, then rename it over the vault.
    ///
    /// Callers must hold `write_lock`.
    async fn write_entries(&self, entries: &VaultEntries) -> Result<(), VaultError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| VaultError::io(parent, e))?;
        }

        let contents = serde_json::to_vec_pretty(entries)?;
        let tmp = self.temp_path();

        tokio::fs::write(&tmp, &contents)
            .await
            .map_err(|e| VaultError::io(&tmp, e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))
                .await
                .map_err(|e| VaultError::io(&tmp, e))?;
        }

        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| VaultError::io(&self.path, e))?;

        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "vault".to_string());
        self.path.with_file_name(format!(".{}.tmp", name))
    }
}
