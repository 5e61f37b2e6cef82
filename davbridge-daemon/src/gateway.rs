//! HTTP gateway.
//!
//! Every request, whatever its method or path, must carry Basic
//! credentials whose password is a base64 bridge key. Authenticated
//! requests are forwarded to the session's protocol handler.

use std::sync::Arc;

use axum::Router;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use davbridge_core::{Bridge, BridgeError, Secret, SecretKey};
use tower_http::trace::TraceLayer;

use crate::handler::ProtocolHandler;

/// The bridge as shared by the gateway.
pub type SharedBridge = Arc<Bridge<dyn ProtocolHandler>>;

/// Reasons the gateway refuses a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Missing or malformed `Authorization` header.
    MissingCredentials,
    /// The password is not a base64 encoded bridge key.
    InvalidPasswordFormat,
    /// Unknown user, wrong password or unreadable vault entry.
    InvalidCredentials,
    /// The session could not be established.
    Internal,
}

impl From<BridgeError> for GatewayError {
    fn from(error: BridgeError) -> Self {
        match error {
            BridgeError::Unauthorized => GatewayError::InvalidCredentials,
            BridgeError::Internal { .. } => GatewayError::Internal,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let message = match self {
            GatewayError::MissingCredentials => "Credentials are required",
            GatewayError::InvalidPasswordFormat => "Invalid password format",
            GatewayError::InvalidCredentials => "Invalid username or password",
            GatewayError::Internal => {
                return (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response();
            }
        };

        (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, "Basic")],
            message,
        )
            .into_response()
    }
}

/// Username and password from a Basic `Authorization` header.
pub struct BasicCredentials {
    pub username: String,
    pub password: Secret,
}

impl BasicCredentials {
    /// Parse the `Authorization` header.
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, GatewayError> {
        let value = headers
            .get(header::AUTHORIZATION)
            .ok_or(GatewayError::MissingCredentials)?
            .to_str()
            .map_err(|_| GatewayError::MissingCredentials)?;

        let (scheme, encoded) = value
            .split_once(' ')
            .ok_or(GatewayError::MissingCredentials)?;
        if !scheme.eq_ignore_ascii_case("basic") {
            return Err(GatewayError::MissingCredentials);
        }

        let decoded = STANDARD
            .decode(encoded.trim())
            .map_err(|_| GatewayError::MissingCredentials)?;
        let decoded = String::from_utf8(decoded).map_err(|_| GatewayError::MissingCredentials)?;
        let (username, password) = decoded
            .split_once(':')
            .ok_or(GatewayError::MissingCredentials)?;

        Ok(Self {
            username: username.to_string(),
            password: Secret::new(password),
        })
    }

    /// Decode the password as a bridge key.
    pub fn key(&self) -> Result<SecretKey, GatewayError> {
        SecretKey::from_base64(self.password.expose())
            .map_err(|_| GatewayError::InvalidPasswordFormat)
    }
}

impl std::fmt::Debug for BasicCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicCredentials")
            .field("username", &self.username)
            .field("password", &self.password)
            .finish()
    }
}

/// Build the gateway router: one catch-all route behind request tracing.
pub fn router(bridge: SharedBridge) -> Router {
    Router::new()
        .fallback(dispatch)
        .with_state(bridge)
        .layer(TraceLayer::new_for_http())
}

async fn dispatch(
    State(bridge): State<SharedBridge>,
    request: Request,
) -> Result<Response, GatewayError> {
    let credentials = BasicCredentials::from_headers(request.headers())?;
    let key = credentials.key()?;

    let session = bridge.resolve(&credentials.username, &key).await?;
    Ok(session.handler().serve(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    fn basic(userpass: &str) -> HeaderMap {
        headers(&format!("Basic {}", STANDARD.encode(userpass)))
    }

    #[test]
    fn test_parse_basic_credentials() {
        let creds = BasicCredentials::from_headers(&basic("alice:pa:ss")).unwrap();
        assert_eq!(creds.username, "alice");
        assert_eq!(creds.password.expose(), "pa:ss");
    }

    #[test]
    fn test_scheme_is_case_insensitive() {
        let value = format!("basic {}", STANDARD.encode("alice:pw"));
        assert!(BasicCredentials::from_headers(&headers(&value)).is_ok());
    }

    #[test]
    fn test_missing_or_malformed_header() {
        assert_eq!(
            BasicCredentials::from_headers(&HeaderMap::new()).unwrap_err(),
            GatewayError::MissingCredentials
        );
        let no_colon = format!("Basic {}", STANDARD.encode("no-colon"));
        for value in ["Bearer abc", "Basic", "Basic !!!", no_colon.as_str()] {
            assert_eq!(
                BasicCredentials::from_headers(&headers(value)).unwrap_err(),
                GatewayError::MissingCredentials,
                "header {:?}",
                value
            );
        }
    }

    #[test]
    fn test_password_must_be_a_bridge_key() {
        let creds = BasicCredentials::from_headers(&basic("alice:hunter2")).unwrap();
        assert_eq!(creds.key().unwrap_err(), GatewayError::InvalidPasswordFormat);

        let short = STANDARD.encode([0u8; 16]);
        let creds = BasicCredentials::from_headers(&basic(&format!("alice:{}", short))).unwrap();
        assert_eq!(creds.key().unwrap_err(), GatewayError::InvalidPasswordFormat);

        let key = SecretKey::generate();
        let creds = BasicCredentials::from_headers(&basic(&format!(
            "alice:{}",
            key.to_base64().expose()
        )))
        .unwrap();
        assert_eq!(creds.key().unwrap().as_bytes(), key.as_bytes());
    }

    #[test]
    fn test_debug_redacts_password() {
        let creds = BasicCredentials::from_headers(&basic("alice:hunter2")).unwrap();
        let debug = format!("{:?}", creds);
        assert!(debug.contains("alice"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_error_responses() {
        let response = GatewayError::MissingCredentials.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[header::WWW_AUTHENTICATE], "Basic");

        let response = GatewayError::Internal.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.headers().get(header::WWW_AUTHENTICATE).is_none());
    }
}
