//! # Davbridge Core
//!
//! Core library for the davbridge local authentication gateway.
//!
//! This crate provides:
//! - An encrypted, file-backed credential vault keyed by per-user bridge passwords
//! - Upstream session establishment (interactive login and token refresh)
//! - A per-session event relay polling the upstream for changes
//! - A session cache with singleflight cold starts and idle eviction
//! - [`Bridge`], which ties these together behind a single `resolve` call
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use davbridge_core::{Bridge, SecretKey};
//!
//! async fn serve<H>(bridge: &Bridge<H>, username: &str, password: &str) -> anyhow::Result<()> {
//!     let key = SecretKey::from_base64(password)?;
//!     let session = bridge.resolve(username, &key).await?;
//!     println!("{} has {} unlocked key(s)", username, session.keys().len());
//!     Ok(())
//! }
//! ```

pub mod authenticator;
pub mod bridge;
pub mod crypto;
pub mod enroll;
pub mod error;
pub mod model;
pub mod relay;
pub mod secret;
pub mod session;
pub mod upstream;
pub mod vault;

// Re-export commonly used types at crate root
pub use model::{
    AuthInfo,
    CredentialRecord,
    Event,
    EventId,
    KeySet,
    PasswordMode,
    UnlockedKey,
    UpstreamAuth,
};

pub use secret::{
    KeyFormatError,
    Secret,
    SecretKey,
};

pub use crypto::{
    CryptoError,
    SecretVerifier,
};

pub use vault::{
    CredentialVault,
    VaultError,
};

pub use upstream::{
    HttpUpstream,
    HttpUpstreamFactory,
    UpstreamClient,
    UpstreamConfig,
    UpstreamError,
    UpstreamFactory,
};

pub use authenticator::{
    AuthError,
    Authenticator,
    Prompt,
};

pub use enroll::enroll;

pub use relay::{
    EventRelay,
    MAX_POLL_INTERVAL,
    RelayHandle,
};

pub use session::{
    Session,
    SessionCache,
};

pub use bridge::{
    Bridge,
    BridgeError,
    BridgeOptions,
    HandlerContext,
    HandlerFactory,
};

pub use error::DavbridgeError;
