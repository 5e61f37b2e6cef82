//! Upstream session establishment.
//!
//! [`Authenticator::refresh`] is the cold-start path: it rotates the stored
//! refresh token and unlocks the account's keys. [`Authenticator::login`] is
//! the one-time interactive path used at enrollment.
//!
//! Refresh tokens are single use. Callers must persist the record returned
//! by `refresh` before doing anything else, or the next cold start fails.
//! Expired or revoked refresh tokens surface as [`AuthError::Upstream`];
//! there is no automatic re-login.

use std::sync::Arc;

use thiserror::Error;

use crate::model::{CredentialRecord, KeySet, PasswordMode};
use crate::secret::Secret;
use crate::upstream::{UpstreamClient, UpstreamError};

/// Error type for authentication operations.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The upstream rejected or failed a request.
    #[error("upstream authentication failed: {0}")]
    Upstream(#[from] UpstreamError),

    /// Interactive input could not be read.
    #[error("prompt failed: {message}")]
    Prompt { message: String },

    /// The account unlocked but exposed no usable keys.
    #[error("account has no unlockable keys")]
    NoKeys,
}

/// Source of interactive input during login.
pub trait Prompt: Send {
    /// Read a value without echoing it.
    fn secret(&mut self, label: &str) -> Result<Secret, AuthError>;

    /// Read a visible line of input.
    fn line(&mut self, label: &str) -> Result<String, AuthError>;
}

/// Establishes upstream sessions for one client.
pub struct Authenticator {
    client: Arc<dyn UpstreamClient>,
}

impl Authenticator {
    pub fn new(client: Arc<dyn UpstreamClient>) -> Self {
        Self { client }
    }

    /// The client this authenticator drives.
    pub fn client(&self) -> &Arc<dyn UpstreamClient> {
        &self.client
    }

    /// Rotate the record's refresh token and unlock its key set.
    ///
    /// Returns the updated record, which the caller must persist immediately.
    pub async fn refresh(
        &self,
        record: &CredentialRecord,
    ) -> Result<(CredentialRecord, KeySet), AuthError> {
        let auth = self.client.auth_refresh(&record.auth).await?;
        tracing::debug!("Refreshed upstream session {}", auth.uid);

        let keys = self.client.unlock(&auth, &record.mailbox_password).await?;
        if keys.is_empty() {
            return Err(AuthError::NoKeys);
        }

        let updated = CredentialRecord {
            auth,
            login_password: record.login_password.clone(),
            mailbox_password: record.mailbox_password.clone(),
        };

        Ok((updated, keys))
    }

    /// Interactive first login.
    ///
    /// Prompts for the password, a second-factor code if the account needs
    /// one, and a mailbox password only for two-password accounts. The
    /// result is verified by unlocking the keys once.
    pub async fn login(
        &self,
        username: &str,
        prompt: &mut dyn Prompt,
    ) -> Result<CredentialRecord, AuthError> {
        let login_password = prompt.secret("Password")?;

        let info = self.client.auth_info(username).await?;
        let two_factor_code = if info.two_factor {
            Some(prompt.line("2FA code")?)
        } else {
            None
        };

        let auth = self
            .client
            .auth(username, &login_password, two_factor_code.as_deref(), &info)
            .await?;

        let mailbox_password = match auth.password_mode {
            PasswordMode::Single => login_password.clone(),
            PasswordMode::Two => prompt.secret("Mailbox password")?,
        };

        let keys = self.client.unlock(&auth, &mailbox_password).await?;
        if keys.is_empty() {
            return Err(AuthError::NoKeys);
        }
        tracing::info!("Unlocked {} key(s) for {}", keys.len(), username);

        Ok(CredentialRecord {
            auth,
            login_password,
            mailbox_password,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::mock::{MockUpstream, ScriptedPrompt};
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn test_login_single_password() {
        let upstream = Arc::new(MockUpstream::new("hunter2"));
        let authenticator = Authenticator::new(upstream.clone());
        let mut prompt = ScriptedPrompt::new(&["hunter2"]);

        let record = authenticator.login("alice", &mut prompt).await.unwrap();

        assert_eq!(prompt.asked, vec!["Password"]);
        assert_eq!(record.login_password.expose(), "hunter2");
        assert_eq!(record.mailbox_password.expose(), "hunter2");
        assert_eq!(record.auth.password_mode, PasswordMode::Single);
        assert_eq!(upstream.unlock_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_login_with_two_factor_and_mailbox_password() {
        let upstream = Arc::new(
            MockUpstream::new("hunter2")
                .with_two_factor("123456")
                .with_mailbox_password("mailbox"),
        );
        let authenticator = Authenticator::new(upstream);
        let mut prompt = ScriptedPrompt::new(&["hunter2", "123456", "mailbox"]);

        let record = authenticator.login("alice", &mut prompt).await.unwrap();

        assert_eq!(prompt.asked, vec!["Password", "2FA code", "Mailbox password"]);
        assert_eq!(record.mailbox_password.expose(), "mailbox");
        assert_eq!(record.auth.password_mode, PasswordMode::Two);
    }

    #[tokio::test]
    async fn test_login_wrong_password_fails() {
        let authenticator = Authenticator::new(Arc::new(MockUpstream::new("hunter2")));
        let mut prompt = ScriptedPrompt::new(&["wrong"]);

        let result = authenticator.login("alice", &mut prompt).await;
        assert!(matches!(result, Err(AuthError::Upstream(UpstreamError::Api { .. }))));
    }

    #[tokio::test]
    async fn test_login_wrong_mailbox_password_fails() {
        let upstream = Arc::new(MockUpstream::new("hunter2").with_mailbox_password("mailbox"));
        let authenticator = Authenticator::new(upstream);
        let mut prompt = ScriptedPrompt::new(&["hunter2", "not-the-mailbox"]);

        assert!(authenticator.login("alice", &mut prompt).await.is_err());
    }

    #[tokio::test]
    async fn test_refresh_rotates_token_and_unlocks() {
        let upstream = Arc::new(MockUpstream::new("hunter2"));
        let authenticator = Authenticator::new(upstream.clone());
        let mut prompt = ScriptedPrompt::new(&["hunter2"]);
        let record = authenticator.login("alice", &mut prompt).await.unwrap();

        let (updated, keys) = authenticator.refresh(&record).await.unwrap();

        assert_ne!(updated.auth.refresh_token, record.auth.refresh_token);
        assert_eq!(updated.auth.event_id, record.auth.event_id);
        assert_eq!(updated.mailbox_password, record.mailbox_password);
        assert_eq!(keys.len(), 1);

        // The old token is spent.
        assert!(authenticator.refresh(&record).await.is_err());
        // The rotated one works.
        assert!(authenticator.refresh(&updated).await.is_ok());
    }

    #[tokio::test]
    async fn test_refresh_failure_is_upstream_error() {
        let upstream = Arc::new(MockUpstream::new("hunter2"));
        let authenticator = Authenticator::new(upstream.clone());
        let mut prompt = ScriptedPrompt::new(&["hunter2"]);
        let record = authenticator.login("alice", &mut prompt).await.unwrap();

        upstream.set_fail_refresh(true);
        let result = authenticator.refresh(&record).await;
        assert!(matches!(result, Err(AuthError::Upstream(_))));
        assert_eq!(upstream.unlock_calls.load(Ordering::SeqCst), 1);
    }
}
