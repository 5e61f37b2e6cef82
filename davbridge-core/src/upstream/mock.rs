//! Scripted test doubles.
//!
//! A single [`MockUpstream`] is shared by every client its factory hands
//! out, so call counters observe the whole process. [`ScriptedPrompt`]
//! answers login prompts from a fixed list.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{UpstreamClient, UpstreamError, UpstreamFactory};
use crate::authenticator::{AuthError, Prompt};
use crate::model::{AuthInfo, Event, EventId, KeySet, PasswordMode, UnlockedKey, UpstreamAuth};
use crate::secret::Secret;

/// Upstream double with configurable credentials and scripted events.
pub struct MockUpstream {
    login_password: String,
    mailbox_password: Option<String>,
    two_factor_code: Option<String>,
    refresh_delay: Duration,
    fail_refresh: AtomicBool,
    refresh_token: Mutex<String>,
    events: Mutex<VecDeque<Result<Event, UpstreamError>>>,
    pub auth_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub unlock_calls: AtomicUsize,
    pub event_calls: AtomicUsize,
}

impl MockUpstream {
    /// A single-password account with password `password` and no second factor.
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            login_password: password.into(),
            mailbox_password: None,
            two_factor_code: None,
            refresh_delay: Duration::ZERO,
            fail_refresh: AtomicBool::new(false),
            refresh_token: Mutex::new("refresh-0".to_string()),
            events: Mutex::new(VecDeque::new()),
            auth_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            unlock_calls: AtomicUsize::new(0),
            event_calls: AtomicUsize::new(0),
        }
    }

    /// Require a second-factor code at login.
    pub fn with_two_factor(mut self, code: impl Into<String>) -> Self {
        self.two_factor_code = Some(code.into());
        self
    }

    /// Switch to a two-password account.
    pub fn with_mailbox_password(mut self, password: impl Into<String>) -> Self {
        self.mailbox_password = Some(password.into());
        self
    }

    /// Delay every refresh, widening race windows.
    pub fn with_refresh_delay(mut self, delay: Duration) -> Self {
        self.refresh_delay = delay;
        self
    }

    /// Make subsequent refreshes fail as if the token had expired.
    pub fn set_fail_refresh(&self, fail: bool) {
        self.fail_refresh.store(fail, Ordering::SeqCst);
    }

    /// Queue an event for the next poll.
    pub fn push_event(&self, event: Event) {
        self.events.lock().push_back(Ok(event));
    }

    /// Queue a failure for the next poll.
    pub fn push_error(&self, error: UpstreamError) {
        self.events.lock().push_back(Err(error));
    }

    /// The refresh token the mock currently accepts.
    pub fn current_refresh_token(&self) -> String {
        self.refresh_token.lock().clone()
    }

    fn password_mode(&self) -> PasswordMode {
        if self.mailbox_password.is_some() {
            PasswordMode::Two
        } else {
            PasswordMode::Single
        }
    }

    fn issue(&self, generation: usize, event_id: EventId) -> UpstreamAuth {
        let refresh_token = format!("refresh-{}", generation);
        *self.refresh_token.lock() = refresh_token.clone();

        UpstreamAuth {
            uid: "mock-uid".to_string(),
            access_token: Secret::new(format!("access-{}", generation)),
            refresh_token: Secret::new(refresh_token),
            token_type: "Bearer".to_string(),
            scope: "full".to_string(),
            expires_at: None,
            event_id,
            password_mode: self.password_mode(),
        }
    }

    fn rejected(message: &str) -> UpstreamError {
        UpstreamError::Api {
            status: 401,
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl UpstreamClient for MockUpstream {
    async fn auth_info(&self, _username: &str) -> Result<AuthInfo, UpstreamError> {
        Ok(AuthInfo {
            two_factor: self.two_factor_code.is_some(),
            session: Some("mock-session".to_string()),
        })
    }

    async fn auth(
        &self,
        _username: &str,
        password: &Secret,
        two_factor_code: Option<&str>,
        _info: &AuthInfo,
    ) -> Result<UpstreamAuth, UpstreamError> {
        self.auth_calls.fetch_add(1, Ordering::SeqCst);

        if password.expose() != self.login_password {
            return Err(Self::rejected("incorrect login credentials"));
        }
        if self.two_factor_code.as_deref() != two_factor_code {
            return Err(Self::rejected("incorrect second factor"));
        }

        Ok(self.issue(0, EventId::new("event-0")))
    }

    async fn auth_refresh(&self, auth: &UpstreamAuth) -> Result<UpstreamAuth, UpstreamError> {
        let generation = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;

        if !self.refresh_delay.is_zero() {
            tokio::time::sleep(self.refresh_delay).await;
        }
        if self.fail_refresh.load(Ordering::SeqCst) {
            return Err(Self::rejected("invalid refresh token"));
        }
        if auth.refresh_token.expose() != self.current_refresh_token() {
            return Err(Self::rejected("refresh token already used"));
        }

        Ok(self.issue(generation, auth.event_id.clone()))
    }

    async fn unlock(
        &self,
        _auth: &UpstreamAuth,
        mailbox_password: &Secret,
    ) -> Result<KeySet, UpstreamError> {
        self.unlock_calls.fetch_add(1, Ordering::SeqCst);

        let expected = self
            .mailbox_password
            .as_deref()
            .unwrap_or(&self.login_password);
        if mailbox_password.expose() != expected {
            return Err(Self::rejected("incorrect mailbox password"));
        }

        Ok(KeySet::new(vec![UnlockedKey {
            id: "key-1".to_string(),
            fingerprint: "0123456789abcdef".to_string(),
            material: Secret::new("unlocked-key-material"),
        }]))
    }

    async fn get_event(&self, last: &EventId) -> Result<Event, UpstreamError> {
        self.event_calls.fetch_add(1, Ordering::SeqCst);

        match self.events.lock().pop_front() {
            Some(result) => result,
            None => Ok(Event::new(last.as_str())),
        }
    }
}

/// Factory handing out clones of one shared [`MockUpstream`].
pub struct MockUpstreamFactory {
    upstream: Arc<MockUpstream>,
}

impl MockUpstreamFactory {
    pub fn new(upstream: Arc<MockUpstream>) -> Self {
        Self { upstream }
    }
}

impl UpstreamFactory for MockUpstreamFactory {
    fn connect(&self) -> Arc<dyn UpstreamClient> {
        self.upstream.clone()
    }
}

/// Replays canned answers and records the labels asked for.
pub struct ScriptedPrompt {
    answers: VecDeque<String>,
    pub asked: Vec<String>,
}

impl ScriptedPrompt {
    pub fn new(answers: &[&str]) -> Self {
        Self {
            answers: answers.iter().map(|s| s.to_string()).collect(),
            asked: Vec::new(),
        }
    }

    fn next(&mut self, label: &str) -> Result<String, AuthError> {
        self.asked.push(label.to_string());
        self.answers.pop_front().ok_or_else(|| AuthError::Prompt {
            message: format!("no answer scripted for {}", label),
        })
    }
}

impl Prompt for ScriptedPrompt {
    fn secret(&mut self, label: &str) -> Result<Secret, AuthError> {
        self.next(label).map(Secret::new)
    }

    fn line(&mut self, label: &str) -> Result<String, AuthError> {
        self.next(label)
    }
}
