//! JSON-over-HTTP upstream client.
//!
//! Endpoints, relative to [`UpstreamConfig::root_url`]:
//!
//! | call            | request                                   |
//! |-----------------|-------------------------------------------|
//! | `auth_info`     | `POST auth/info`                          |
//! | `auth`          | `POST auth`                               |
//! | `auth_refresh`  | `POST auth/refresh`                       |
//! | `unlock`        | `POST keys/unlock` (bearer)               |
//! | `get_event`     | `GET events/{cursor}` (bearer)            |

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::RwLock;
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use super::{UpstreamClient, UpstreamError, UpstreamFactory};
use crate::model::{AuthInfo, Event, EventId, KeySet, PasswordMode, UpstreamAuth};
use crate::secret::Secret;

/// Connection settings for the upstream API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL of the API, e.g. `https://api.example.com/`.
    pub root_url: String,

    /// Sent as `x-app-version` on every request.
    pub app_version: String,

    /// Sent as `x-client-id` on every request.
    pub client_id: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            root_url: String::new(),
            app_version: concat!("davbridge/", env!("CARGO_PKG_VERSION")).to_string(),
            client_id: "davbridge".to_string(),
        }
    }
}

impl UpstreamConfig {
    /// Parse the root URL, normalising it to end with a slash so relative
    /// joins stay under it.
    pub fn base_url(&self) -> Result<Url, UpstreamError> {
        if self.root_url.trim().is_empty() {
            return Err(UpstreamError::InvalidUrl {
                message: "upstream root_url is not configured".to_string(),
            });
        }

        let mut root = self.root_url.trim().to_string();
        if !root.ends_with('/') {
            root.push('/');
        }

        Url::parse(&root).map_err(|e| UpstreamError::InvalidUrl {
            message: format!("{}: {}", self.root_url, e),
        })
    }
}

#[derive(Serialize)]
struct AuthInfoRequest<'a> {
    username: &'a str,
}

#[derive(Serialize)]
struct AuthRequest<'a> {
    username: &'a str,
    password: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    two_factor_code: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    session: Option<&'a str>,
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    uid: &'a str,
    refresh_token: &'a str,
}

#[derive(Serialize)]
struct UnlockRequest<'a> {
    mailbox_password: &'a str,
}

#[derive(Deserialize)]
struct AuthResponse {
    uid: String,
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    scope: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    event_id: Option<String>,
    #[serde(default)]
    password_mode: Option<PasswordMode>,
}

impl AuthResponse {
    /// Convert to [`UpstreamAuth`], taking the event cursor and password
    /// mode from `previous` when the response omits them.
    ///
    /// An `expires_in` too large to represent as a timestamp is a
    /// [`UpstreamError::Decode`].
    fn into_auth(self, previous: Option<&UpstreamAuth>) -> Result<UpstreamAuth, UpstreamError> {
        let event_id = match self.event_id {
            Some(id) if !id.is_empty() => EventId::new(id),
            _ => previous.map(|p| p.event_id.clone()).unwrap_or_default(),
        };
        let password_mode = self
            .password_mode
            .or(previous.map(|p| p.password_mode))
            .unwrap_or_default();
        let expires_at = match self.expires_in {
            Some(secs) => Some(expiry_from_now(secs)?),
            None => None,
        };

        Ok(UpstreamAuth {
            uid: self.uid,
            access_token: Secret::new(self.access_token),
            refresh_token: Secret::new(self.refresh_token),
            token_type: self.token_type.unwrap_or_else(|| "Bearer".to_string()),
            scope: self.scope,
            expires_at,
            event_id,
            password_mode,
        })
    }
}

fn expiry_from_now(secs: i64) -> Result<DateTime<Utc>, UpstreamError> {
    TimeDelta::try_seconds(secs)
        .and_then(|delta| Utc::now().checked_add_signed(delta))
        .ok_or_else(|| UpstreamError::Decode {
            message: format!("expires_in out of range: {}", secs),
        })
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: String,
}

/// Bearer credentials of the current session.
struct SessionTokens {
    uid: String,
    access_token: Secret,
}

/// Upstream client speaking JSON over HTTP.
pub struct HttpUpstream {
    config: UpstreamConfig,
    base: Url,
    http: reqwest::Client,
    session: RwLock<Option<SessionTokens>>,
}

impl HttpUpstream {
    /// Create a client with its own connection pool.
    pub fn new(config: UpstreamConfig) -> Result<Self, UpstreamError> {
        Self::with_client(config, reqwest::Client::new())
    }

    /// Create a client sharing an existing connection pool.
    pub fn with_client(config: UpstreamConfig, http: reqwest::Client) -> Result<Self, UpstreamError> {
        let base = config.base_url()?;
        Ok(Self {
            config,
            base,
            http,
            session: RwLock::new(None),
        })
    }

    /// Whether a session token is held.
    pub fn is_authenticated(&self) -> bool {
        self.session.read().is_some()
    }

    fn endpoint(&self, path: &str) -> Result<Url, UpstreamError> {
        self.base.join(path).map_err(|e| UpstreamError::InvalidUrl {
            message: format!("{}: {}", path, e),
        })
    }

    fn request(&self, method: reqwest::Method, url: Url) -> RequestBuilder {
        self.http
            .request(method, url)
            .header("x-app-version", &self.config.app_version)
            .header("x-client-id", &self.config.client_id)
    }

    fn authorized(&self, method: reqwest::Method, url: Url) -> Result<RequestBuilder, UpstreamError> {
        let session = self.session.read();
        let tokens = session.as_ref().ok_or(UpstreamError::NotAuthenticated)?;
        Ok(self
            .request(method, url)
            .header("x-uid", &tokens.uid)
            .bearer_auth(tokens.access_token.expose()))
    }

    fn remember(&self, auth: &UpstreamAuth) {
        *self.session.write() = Some(SessionTokens {
            uid: auth.uid.clone(),
            access_token: auth.access_token.clone(),
        });
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, UpstreamError> {
        let response = request.send().await.map_err(|e| UpstreamError::Network {
            message: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorBody>(&body)
                .map(|b| b.error)
                .unwrap_or(body);
            return Err(UpstreamError::Api {
                status: status.as_u16(),
                message,
            });
        }

        response.json::<T>().await.map_err(|e| UpstreamError::Decode {
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl UpstreamClient for HttpUpstream {
    async fn auth_info(&self, username: &str) -> Result<AuthInfo, UpstreamError> {
        let url = self.endpoint("auth/info")?;
        self.send(
            self.request(reqwest::Method::POST, url)
                .json(&AuthInfoRequest { username }),
        )
        .await
    }

    async fn auth(
        &self,
        username: &str,
        password: &Secret,
        two_factor_code: Option<&str>,
        info: &AuthInfo,
    ) -> Result<UpstreamAuth, UpstreamError> {
        let url = self.endpoint("auth")?;
        let response: AuthResponse = self
            .send(self.request(reqwest::Method::POST, url).json(&AuthRequest {
                username,
                password: password.expose(),
                two_factor_code,
                session: info.session.as_deref(),
            }))
            .await?;

        let auth = response.into_auth(None)?;
        self.remember(&auth);
        tracing::debug!("Authenticated {} with upstream", username);
        Ok(auth)
    }

    async fn auth_refresh(&self, auth: &UpstreamAuth) -> Result<UpstreamAuth, UpstreamError> {
        let url = self.endpoint("auth/refresh")?;
        let response: AuthResponse = self
            .send(self.request(reqwest::Method::POST, url).json(&RefreshRequest {
                uid: &auth.uid,
                refresh_token: auth.refresh_token.expose(),
            }))
            .await?;

        let refreshed = response.into_auth(Some(auth))?;
        self.remember(&refreshed);
        Ok(refreshed)
    }

    async fn unlock(
        &self,
        auth: &UpstreamAuth,
        mailbox_password: &Secret,
    ) -> Result<KeySet, UpstreamError> {
        if !self.is_authenticated() {
            self.remember(auth);
        }

        let url = self.endpoint("keys/unlock")?;
        self.send(
            self.authorized(reqwest::Method::POST, url)?
                .json(&UnlockRequest {
                    mailbox_password: mailbox_password.expose(),
                }),
        )
        .await
    }

    async fn get_event(&self, last: &EventId) -> Result<Event, UpstreamError> {
        let mut url = self.endpoint("events/")?;
        url.path_segments_mut()
            .map_err(|_| UpstreamError::InvalidUrl {
                message: "root URL cannot be a base".to_string(),
            })?
            .pop_if_empty()
            .push(last.as_str());

        self.send(self.authorized(reqwest::Method::GET, url)?).await
    }
}

/// Builds [`HttpUpstream`] clients that share one connection pool.
pub struct HttpUpstreamFactory {
    config: UpstreamConfig,
    base: Url,
    http: reqwest::Client,
}

impl HttpUpstreamFactory {
    /// Validate `config` and create a factory.
    pub fn new(config: UpstreamConfig) -> Result<Self, UpstreamError> {
        let base = config.base_url()?;
        Ok(Self {
            config,
            base,
            http: reqwest::Client::new(),
        })
    }
}

impl UpstreamFactory for HttpUpstreamFactory {
    fn connect(&self) -> Arc<dyn UpstreamClient> {
        Arc::new(HttpUpstream {
            config: self.config.clone(),
            base: self.base.clone(),
            http: self.http.clone(),
            session: RwLock::new(None),
        })
    }
}
