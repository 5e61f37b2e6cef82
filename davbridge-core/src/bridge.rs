//! Session resolution and cold start.
//!
//! [`Bridge`] turns a username and a presented bridge key into a ready
//! [`Session`]. A cached session only needs the key checked against its
//! verifier. Otherwise the bridge runs a cold start: decrypt the vault
//! entry, rotate the upstream refresh token, persist the rotated record,
//! start the event relay and build the protocol handler.
//!
//! Anything that goes wrong before the entry decrypts is reported as
//! [`BridgeError::Unauthorized`] so that an unknown user, a wrong key and
//! a corrupted entry are indistinguishable. Failures after that point are
//! [`BridgeError::Internal`] and carry no detail beyond the log.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::authenticator::Authenticator;
use crate::crypto::SecretVerifier;
use crate::model::{Event, KeySet};
use crate::relay::{DEFAULT_POLL_INTERVAL, EventRelay};
use crate::secret::SecretKey;
use crate::session::{Session, SessionCache};
use crate::upstream::{UpstreamClient, UpstreamFactory};
use crate::vault::CredentialVault;

/// Default capacity of each handler's event channel.
pub const DEFAULT_EVENT_BUFFER: usize = 16;

/// Outcome of a failed [`Bridge::resolve`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// Unknown user, wrong key or undecryptable entry.
    #[error("invalid username or password")]
    Unauthorized,

    /// The entry decrypted but the session could not be established.
    #[error("internal error: {message}")]
    Internal { message: String },
}

/// Everything a protocol handler is built from.
pub struct HandlerContext {
    pub username: String,
    pub keys: Arc<KeySet>,
    pub upstream: Arc<dyn UpstreamClient>,
    /// Events forwarded by the session's relay, in upstream order.
    pub events: mpsc::Receiver<Event>,
}

/// Builds one protocol handler per session.
pub trait HandlerFactory<H: ?Sized>: Send + Sync {
    fn build(&self, ctx: HandlerContext) -> Arc<H>;
}

/// Tuning knobs for [`Bridge`].
#[derive(Debug, Clone)]
pub struct BridgeOptions {
    pub poll_interval: Duration,
    pub event_buffer: usize,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

/// Resolves credentials to cached or freshly unlocked sessions.
pub struct Bridge<H: ?Sized> {
    vault: Arc<CredentialVault>,
    upstream: Arc<dyn UpstreamFactory>,
    handlers: Arc<dyn HandlerFactory<H>>,
    sessions: SessionCache<H>,
    options: BridgeOptions,
    shutdown: CancellationToken,
}

impl<H: ?Sized + Send + Sync> Bridge<H> {
    pub fn new(
        vault: Arc<CredentialVault>,
        upstream: Arc<dyn UpstreamFactory>,
        handlers: Arc<dyn HandlerFactory<H>>,
        options: BridgeOptions,
    ) -> Self {
        Self {
            vault,
            upstream,
            handlers,
            sessions: SessionCache::new(),
            options,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn vault(&self) -> &Arc<CredentialVault> {
        &self.vault
    }

    pub fn sessions(&self) -> &SessionCache<H> {
        &self.sessions
    }

    /// Return the session for `username`, cold-starting it if needed.
    ///
    /// Concurrent calls for the same username share one cold start.
    pub async fn resolve(
        &self,
        username: &str,
        key: &SecretKey,
    ) -> Result<Arc<Session<H>>, BridgeError> {
        if let Some(session) = self.sessions.get(username) {
            return self.check_cached(session, key).await;
        }

        let _guard = self.sessions.lock_user(username).await;

        // Another request may have finished the cold start while we waited.
        if let Some(session) = self.sessions.get(username) {
            return self.check_cached(session, key).await;
        }

        self.cold_start(username, key).await
    }

    async fn check_cached(
        &self,
        session: Arc<Session<H>>,
        key: &SecretKey,
    ) -> Result<Arc<Session<H>>, BridgeError> {
        let valid = self
            .sessions
            .verify_secret(&session, key)
            .await
            .map_err(internal("verify bridge password"))?;

        if !valid {
            tracing::debug!("Rejected bridge password for cached session {}", session.username());
            return Err(BridgeError::Unauthorized);
        }

        session.touch();
        Ok(session)
    }

    async fn cold_start(
        &self,
        username: &str,
        key: &SecretKey,
    ) -> Result<Arc<Session<H>>, BridgeError> {
        let Some(entry) = self
            .vault
            .entry(username)
            .await
            .map_err(internal("read vault"))?
        else {
            tracing::debug!("No vault entry for {}", username);
            return Err(BridgeError::Unauthorized);
        };

        let record = match CredentialVault::decrypt(&entry, key) {
            Ok(record) => record,
            Err(e) if e.is_decryption() => {
                tracing::debug!("Vault entry for {} did not open", username);
                return Err(BridgeError::Unauthorized);
            }
            Err(e) => return Err(internal("parse credential record")(e)),
        };

        tracing::info!("Unlocking session for {}", username);

        let client = self.upstream.connect();
        let authenticator = Authenticator::new(client.clone());
        let (updated, keys) = authenticator
            .refresh(&record)
            .await
            .map_err(internal("refresh upstream session"))?;

        // The old refresh token is spent; persist the new one before anything else.
        let sealed =
            CredentialVault::encrypt(&updated, key).map_err(internal("encrypt credential record"))?;
        self.vault
            .store(username, sealed)
            .await
            .map_err(internal("persist rotated credentials"))?;

        let verifier = SecretVerifier::derive_blocking(key.clone())
            .await
            .map_err(internal("derive verifier"))?;

        let (tx, rx) = mpsc::channel(self.options.event_buffer.max(1));
        let relay = EventRelay::new(client.clone(), self.options.poll_interval).spawn(
            username,
            updated.auth.event_id.clone(),
            tx,
            self.shutdown.child_token(),
        );

        let keys = Arc::new(keys);
        let handler = self.handlers.build(HandlerContext {
            username: username.to_string(),
            keys: keys.clone(),
            upstream: client.clone(),
            events: rx,
        });

        let session = Arc::new(Session::new(username, keys, client, verifier, handler, relay));
        self.sessions.insert(session.clone());

        tracing::info!("Session ready for {} ({} active)", username, self.sessions.len());
        Ok(session)
    }

    /// Evict sessions idle for longer than `max_idle`.
    pub fn evict_idle(&self, max_idle: Duration) -> Vec<String> {
        self.sessions.evict_idle(max_idle)
    }

    /// Stop every relay and drop all sessions.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        let count = self.sessions.clear();
        tracing::info!("Closed {} session(s)", count);
    }
}

/// Log `error` and collapse it into a detail-free [`BridgeError::Internal`].
fn internal<E: std::fmt::Display>(action: &'static str) -> impl FnOnce(E) -> BridgeError {
    move |e| {
        tracing::error!("Failed to {}: {}", action, e);
        BridgeError::Internal {
            message: format!("failed to {}", action),
        }
    }
}
