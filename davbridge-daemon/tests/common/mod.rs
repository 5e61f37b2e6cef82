//! Shared fixtures for gateway integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use axum::extract::Request;
use axum::response::{IntoResponse, Response};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use davbridge_core::upstream::mock::{MockUpstream, MockUpstreamFactory, ScriptedPrompt};
use davbridge_core::{
    Authenticator, Bridge, BridgeOptions, CredentialVault, HandlerContext, HandlerFactory,
    SecretKey, enroll,
};
use davbridge_daemon::{ProtocolHandler, SharedBridge};
use tempfile::TempDir;

pub const PASSWORD: &str = "hunter2";

/// Answers every request with the number of the instance that served it.
pub struct EchoHandler {
    pub instance: usize,
    pub served: AtomicUsize,
}

#[async_trait]
impl ProtocolHandler for EchoHandler {
    async fn serve(&self, request: Request) -> Response {
        self.served.fetch_add(1, Ordering::SeqCst);
        format!(
            "instance-{} {} {}",
            self.instance,
            request.method(),
            request.uri().path()
        )
        .into_response()
    }
}

#[derive(Default)]
pub struct EchoHandlerFactory {
    pub built: AtomicUsize,
}

impl HandlerFactory<dyn ProtocolHandler> for EchoHandlerFactory {
    fn build(&self, _ctx: HandlerContext) -> Arc<dyn ProtocolHandler> {
        let instance = self.built.fetch_add(1, Ordering::SeqCst) + 1;
        Arc::new(EchoHandler {
            instance,
            served: AtomicUsize::new(0),
        })
    }
}

pub struct TestBridge {
    pub temp: TempDir,
    pub upstream: Arc<MockUpstream>,
    pub vault: Arc<CredentialVault>,
    pub handlers: Arc<EchoHandlerFactory>,
    pub bridge: SharedBridge,
}

impl TestBridge {
    pub fn new(upstream: MockUpstream) -> Self {
        let temp = TempDir::new().unwrap();
        let vault = Arc::new(CredentialVault::new(temp.path().join("auth.json")));
        let upstream = Arc::new(upstream);
        let handlers = Arc::new(EchoHandlerFactory::default());

        let bridge: Bridge<dyn ProtocolHandler> = Bridge::new(
            vault.clone(),
            Arc::new(MockUpstreamFactory::new(upstream.clone())),
            handlers.clone(),
            BridgeOptions::default(),
        );

        Self {
            temp,
            upstream,
            vault,
            handlers,
            bridge: Arc::new(bridge),
        }
    }

    /// Enroll `username` and return the printed bridge password.
    pub async fn enroll(&self, username: &str) -> String {
        let authenticator = Authenticator::new(self.upstream.clone());
        let mut prompt = ScriptedPrompt::new(&[PASSWORD]);
        let key = enroll(&authenticator, &self.vault, username, &mut prompt)
            .await
            .unwrap();
        key.to_base64().expose().to_string()
    }

    pub fn refresh_calls(&self) -> usize {
        self.upstream.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn vault_writes(&self) -> u64 {
        self.vault.write_count()
    }

    pub fn handlers_built(&self) -> usize {
        self.handlers.built.load(Ordering::SeqCst)
    }
}

/// `Authorization` header value for `username:password`.
pub fn basic_auth(username: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{}:{}", username, password)))
}

/// A well-formed bridge password that matches nothing.
pub fn random_password() -> String {
    SecretKey::generate().to_base64().expose().to_string()
}
