//! One-time account enrollment.

use crate::authenticator::{Authenticator, Prompt};
use crate::error::DavbridgeError;
use crate::secret::SecretKey;
use crate::vault::CredentialVault;

/// Log `username` in interactively and store its record under a new key.
///
/// Returns the freshly generated bridge key. It is shown to the user once
/// and never stored; losing it means enrolling again.
pub async fn enroll(
    authenticator: &Authenticator,
    vault: &CredentialVault,
    username: &str,
    prompt: &mut dyn Prompt,
) -> Result<SecretKey, DavbridgeError> {
    let record = authenticator.login(username, prompt).await?;

    let key = SecretKey::generate();
    let entry = CredentialVault::encrypt(&record, &key)?;
    vault.store(username, entry).await?;

    tracing::info!("Enrolled {} in {:?}", username, vault.path());
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authenticator::AuthError;
    use crate::upstream::mock::{MockUpstream, ScriptedPrompt};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_enroll_stores_decryptable_record() {
        let dir = TempDir::new().unwrap();
        let vault = CredentialVault::new(dir.path().join("auth.json"));
        let authenticator = Authenticator::new(Arc::new(MockUpstream::new("hunter2")));
        let mut prompt = ScriptedPrompt::new(&["hunter2"]);

        let key = enroll(&authenticator, &vault, "alice", &mut prompt).await.unwrap();

        let entry = vault.entry("alice").await.unwrap().unwrap();
        let record = CredentialVault::decrypt(&entry, &key).unwrap();
        assert_eq!(record.login_password.expose(), "hunter2");
        assert_eq!(record.auth.refresh_token.expose(), "refresh-0");
    }

    #[tokio::test]
    async fn test_enroll_generates_distinct_keys() {
        let dir = TempDir::new().unwrap();
        let vault = CredentialVault::new(dir.path().join("auth.json"));
        let authenticator = Authenticator::new(Arc::new(MockUpstream::new("hunter2")));

        let first = enroll(&authenticator, &vault, "alice", &mut ScriptedPrompt::new(&["hunter2"]))
            .await
            .unwrap();
        let second = enroll(&authenticator, &vault, "bob", &mut ScriptedPrompt::new(&["hunter2"]))
            .await
            .unwrap();

        assert_ne!(first.as_bytes(), second.as_bytes());
        assert_eq!(vault.usernames().await.unwrap(), vec!["alice", "bob"]);
    }

    #[tokio::test]
    async fn test_failed_login_stores_nothing() {
        let dir = TempDir::new().unwrap();
        let vault = CredentialVault::new(dir.path().join("auth.json"));
        let authenticator = Authenticator::new(Arc::new(MockUpstream::new("hunter2")));
        let mut prompt = ScriptedPrompt::new(&["wrong"]);

        let result = enroll(&authenticator, &vault, "alice", &mut prompt).await;

        assert!(matches!(result, Err(DavbridgeError::Auth(AuthError::Upstream(_)))));
        assert!(!vault.path().exists());
    }
}
