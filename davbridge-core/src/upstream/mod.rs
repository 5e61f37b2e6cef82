//! Upstream API client abstraction.
//!
//! This module provides:
//! - [`UpstreamClient`] - Trait for the upstream operations the bridge needs
//! - [`UpstreamFactory`] - Creates a fresh client per session
//! - [`HttpUpstream`] - JSON-over-HTTP implementation
//! - [`UpstreamConfig`] - Root URL and client identification
//!
//! A client is stateful: once [`auth`](UpstreamClient::auth) or
//! [`auth_refresh`](UpstreamClient::auth_refresh) succeeds it carries the
//! session's bearer token for later calls.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{AuthInfo, Event, EventId, KeySet, UpstreamAuth};
use crate::secret::Secret;

mod http;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use http::{HttpUpstream, HttpUpstreamFactory, UpstreamConfig};

/// Error type for upstream operations.
#[derive(Debug, Clone, Error)]
pub enum UpstreamError {
    /// The request never produced a response.
    #[error("network error: {message}")]
    Network { message: String },

    /// The upstream answered with an error status.
    #[error("upstream API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The response body could not be decoded.
    #[error("invalid upstream response: {message}")]
    Decode { message: String },

    /// An authenticated call was made before logging in.
    #[error("client is not authenticated")]
    NotAuthenticated,

    /// The configured root URL is unusable.
    #[error("invalid upstream URL: {message}")]
    InvalidUrl { message: String },
}

/// Operations the bridge needs from the upstream service.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Fetch pre-login information for `username`.
    async fn auth_info(&self, username: &str) -> Result<AuthInfo, UpstreamError>;

    /// Log in with a password and, when the account requires it, a
    /// second-factor code.
    async fn auth(
        &self,
        username: &str,
        password: &Secret,
        two_factor_code: Option<&str>,
        info: &AuthInfo,
    ) -> Result<UpstreamAuth, UpstreamError>;

    /// Exchange the refresh token in `auth` for a new session.
    ///
    /// The old refresh token is invalid afterwards.
    async fn auth_refresh(&self, auth: &UpstreamAuth) -> Result<UpstreamAuth, UpstreamError>;

    /// Unlock the account's private keys.
    async fn unlock(
        &self,
        auth: &UpstreamAuth,
        mailbox_password: &Secret,
    ) -> Result<KeySet, UpstreamError>;

    /// Fetch the next event after `last`.
    ///
    /// Returns an event whose id equals `last` when nothing changed.
    async fn get_event(&self, last: &EventId) -> Result<Event, UpstreamError>;
}

/// Creates upstream clients.
pub trait UpstreamFactory: Send + Sync {
    /// A new, unauthenticated client.
    fn connect(&self) -> Arc<dyn UpstreamClient>;
}
