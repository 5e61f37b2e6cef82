//! Domain model types for davbridge.
//!
//! This module defines the core types used throughout davbridge:
//! - [`EventId`] - Opaque cursor marking the last processed upstream event
//! - [`UpstreamAuth`] - Tokens and session metadata issued by the upstream service
//! - [`CredentialRecord`] - Everything needed to re-establish an unlocked session
//! - [`KeySet`] - Unlocked private key material for one account
//! - [`Event`] - A single upstream change notification

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::secret::Secret;

/// Opaque upstream identifier marking the last processed event.
///
/// # Examples
///
/// ```
/// use davbridge_core::EventId;
///
/// let cursor = EventId::new("ev-42");
/// assert_eq!(cursor.as_str(), "ev-42");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    /// Create a new event cursor.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the cursor as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether no cursor has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EventId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// How an account's private keys are unlocked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PasswordMode {
    /// The login password also unlocks the mailbox keys.
    #[default]
    Single,

    /// A separate mailbox password unlocks the keys.
    Two,
}

/// Pre-login information about an account.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthInfo {
    /// Whether the account requires a second factor at login.
    #[serde(default)]
    pub two_factor: bool,

    /// Server-side handshake session to echo back on login, if any.
    #[serde(default)]
    pub session: Option<String>,
}

/// An authenticated upstream session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamAuth {
    /// Upstream session identifier.
    pub uid: String,

    /// Short-lived bearer token.
    pub access_token: Secret,

    /// Single-use token exchanged for a new session on refresh.
    pub refresh_token: Secret,

    /// Token type (usually "Bearer").
    #[serde(default = "default_token_type")]
    pub token_type: String,

    /// Space-separated scopes granted to the session.
    #[serde(default)]
    pub scope: String,

    /// When the access token expires, if the upstream reported it.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,

    /// Last upstream event seen when the session was issued.
    #[serde(default)]
    pub event_id: EventId,

    /// How the account's keys are unlocked.
    #[serde(default)]
    pub password_mode: PasswordMode,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl UpstreamAuth {
    /// Check if the access token has expired.
    ///
    /// Returns `false` if no expiration is known.
    pub fn is_expired(&self) -> bool {
        self.expires_at.map(|exp| exp < Utc::now()).unwrap_or(false)
    }
}

/// The persisted credential for one username.
///
/// Never written to disk in cleartext; see [`crate::vault::CredentialVault`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    /// Upstream tokens and session metadata.
    #[serde(flatten)]
    pub auth: UpstreamAuth,

    /// Account login password.
    pub login_password: Secret,

    /// Password that unlocks the account's private keys.
    pub mailbox_password: Secret,
}

/// One unlocked private key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnlockedKey {
    /// Upstream key identifier.
    pub id: String,

    /// Public fingerprint of the key.
    pub fingerprint: String,

    /// Unlocked key material.
    pub material: Secret,
}

/// The unlocked private key set of an account.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeySet {
    pub keys: Vec<UnlockedKey>,
}

impl KeySet {
    pub fn new(keys: Vec<UnlockedKey>) -> Self {
        Self { keys }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Look up a key by its fingerprint.
    pub fn by_fingerprint(&self, fingerprint: &str) -> Option<&UnlockedKey> {
        self.keys.iter().find(|k| k.fingerprint == fingerprint)
    }
}

/// An upstream change notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Cursor of this event.
    pub id: EventId,

    /// Non-zero when the consumer should resynchronise from scratch.
    #[serde(default)]
    pub refresh: u32,

    /// Whether more events are pending after this one.
    #[serde(default)]
    pub more: bool,

    /// Raw change payload, interpreted by the protocol handler.
    #[serde(default)]
    pub changes: serde_json::Value,
}

impl Event {
    /// Create an event with no changes.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: EventId::new(id),
            refresh: 0,
            more: false,
            changes: serde_json::Value::Null,
        }
    }

    /// Attach a change payload.
    pub fn with_changes(mut self, changes: serde_json::Value) -> Self {
        self.changes = changes;
        self
    }
}
