//! In-memory cache of unlocked sessions.
//!
//! A session holds everything a request needs after a successful cold
//! start: the unlocked keys, the authenticated upstream client, the
//! protocol handler and the relay feeding it. The bridge key itself is
//! never kept; only an Argon2 verifier of it.
//!
//! Reads go through an `RwLock`-guarded map. Cold starts for the same
//! username are serialized by a per-username async lock obtained from
//! [`SessionCache::lock_user`], so other users are never blocked.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::OwnedMutexGuard;
use tokio::time::Instant;

use crate::crypto::{CryptoError, SecretVerifier};
use crate::model::KeySet;
use crate::relay::RelayHandle;
use crate::secret::SecretKey;
use crate::upstream::UpstreamClient;

/// An unlocked account ready to serve requests.
pub struct Session<H: ?Sized> {
    username: String,
    keys: Arc<KeySet>,
    upstream: Arc<dyn UpstreamClient>,
    verifier: SecretVerifier,
    handler: Arc<H>,
    relay: RelayHandle,
    created_at: DateTime<Utc>,
    last_used: Mutex<Instant>,
}

impl<H: ?Sized> Session<H> {
    pub fn new(
        username: impl Into<String>,
        keys: Arc<KeySet>,
        upstream: Arc<dyn UpstreamClient>,
        verifier: SecretVerifier,
        handler: Arc<H>,
        relay: RelayHandle,
    ) -> Self {
        Self {
            username: username.into(),
            keys,
            upstream,
            verifier,
            handler,
            relay,
            created_at: Utc::now(),
            last_used: Mutex::new(Instant::now()),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn keys(&self) -> &Arc<KeySet> {
        &self.keys
    }

    pub fn upstream(&self) -> &Arc<dyn UpstreamClient> {
        &self.upstream
    }

    pub fn handler(&self) -> &Arc<H> {
        &self.handler
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Mark the session as used now.
    pub fn touch(&self) {
        *self.last_used.lock() = Instant::now();
    }

    /// Time since the session was last used.
    pub fn idle_for(&self) -> Duration {
        self.last_used.lock().elapsed()
    }

    /// Whether the event relay has stopped.
    pub fn relay_stopped(&self) -> bool {
        self.relay.is_stopped()
    }

    /// Stop the session's event relay.
    pub fn shutdown(&self) {
        self.relay.stop();
    }
}

impl<H: ?Sized> std::fmt::Debug for Session<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("username", &self.username)
            .field("keys", &self.keys.len())
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

type UserLocks = Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>;

/// Username to session map with per-username cold-start locks.
pub struct SessionCache<H: ?Sized> {
    sessions: RwLock<HashMap<String, Arc<Session<H>>>>,
    locks: UserLocks,
}

impl<H: ?Sized> Default for SessionCache<H> {
    fn default() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<H: ?Sized> SessionCache<H> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, username: &str) -> Option<Arc<Session<H>>> {
        self.sessions.read().get(username).cloned()
    }

    /// Cache `session`, stopping any session it replaces.
    pub fn insert(&self, session: Arc<Session<H>>) {
        let previous = self
            .sessions
            .write()
            .insert(session.username().to_string(), session);

        if let Some(previous) = previous {
            previous.shutdown();
        }
    }

    /// Drop the session for `username`, stopping its relay.
    pub fn remove(&self, username: &str) -> Option<Arc<Session<H>>> {
        let removed = self.sessions.write().remove(username);
        if let Some(session) = &removed {
            session.shutdown();
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    pub fn usernames(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sessions.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Check a presented key against the session's verifier.
    ///
    /// Hashing runs on the blocking pool.
    pub async fn verify_secret(
        &self,
        session: &Session<H>,
        key: &SecretKey,
    ) -> Result<bool, CryptoError> {
        session.verifier.verify_blocking(key.clone()).await
    }

    /// Acquire the cold-start lock for `username`.
    ///
    /// Holders for different usernames never contend.
    pub async fn lock_user(&self, username: &str) -> ColdStartGuard {
        let lock = self
            .locks
            .lock()
            .entry(username.to_string())
            .or_default()
            .clone();

        let guard = lock.lock_owned().await;

        ColdStartGuard {
            username: username.to_string(),
            locks: self.locks.clone(),
            guard: Some(guard),
        }
    }

    /// Remove sessions unused for longer than `max_idle`.
    ///
    /// Returns the evicted usernames. Each evicted session's relay is
    /// stopped.
    pub fn evict_idle(&self, max_idle: Duration) -> Vec<String> {
        let evicted: Vec<Arc<Session<H>>> = {
            let mut sessions = self.sessions.write();
            let stale: Vec<String> = sessions
                .iter()
                .filter(|(_, session)| session.idle_for() > max_idle)
                .map(|(username, _)| username.clone())
                .collect();
            stale
                .iter()
                .filter_map(|username| sessions.remove(username))
                .collect()
        };

        evicted
            .iter()
            .map(|session| {
                session.shutdown();
                tracing::info!(
                    "Evicted idle session for {} after {:?}",
                    session.username(),
                    session.idle_for()
                );
                session.username().to_string()
            })
            .collect()
    }

    /// Remove every session, stopping all relays.
    pub fn clear(&self) -> usize {
        let drained: Vec<Arc<Session<H>>> = self.sessions.write().drain().map(|(_, s)| s).collect();
        for session in &drained {
            session.shutdown();
        }
        drained.len()
    }
}

/// Held for the duration of one username's cold start.
pub struct ColdStartGuard {
    username: String,
    locks: UserLocks,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ColdStartGuard {
    fn drop(&mut self) {
        drop(self.guard.take());

        let mut locks = self.locks.lock();
        if let Some(lock) = locks.get(&self.username)
            && Arc::strong_count(lock) == 1
        {
            locks.remove(&self.username);
        }
    }
}
