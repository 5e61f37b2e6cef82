//! Protocol handlers behind the gateway.
//!
//! The gateway authenticates a request and hands it, untouched, to the
//! session's [`ProtocolHandler`]. Real CardDAV/CalDAV handling plugs in
//! here; the daemon ships [`StatusHandler`], which reports the session's
//! state as JSON and records the events its relay delivers.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use axum::Json;
use axum::extract::Request;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use davbridge_core::{Event, EventId, HandlerContext, HandlerFactory, KeySet};
use serde::Serialize;
use tokio::sync::{RwLock, mpsc};

/// Serves requests for one unlocked account.
#[async_trait]
pub trait ProtocolHandler: Send + Sync {
    async fn serve(&self, request: Request) -> Response;
}

/// Latest relay state seen by a [`StatusHandler`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct Snapshot {
    pub last_event: Option<EventId>,
    pub last_event_at: Option<DateTime<Utc>>,
    pub resync_requested: bool,
}

/// Body returned by [`StatusHandler`].
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub username: String,
    pub keys: usize,
    pub fingerprints: Vec<String>,
    pub events_received: u64,
    #[serde(flatten)]
    pub relay: Snapshot,
    pub method: String,
    pub path: String,
}

/// Reports session state and consumes the session's event stream.
pub struct StatusHandler {
    username: String,
    keys: Arc<KeySet>,
    events_received: Arc<AtomicU64>,
    snapshot: Arc<RwLock<Snapshot>>,
}

impl StatusHandler {
    /// Build a handler and start draining `events` in the background.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(username: String, keys: Arc<KeySet>, events: mpsc::Receiver<Event>) -> Self {
        let handler = Self {
            username,
            keys,
            events_received: Arc::new(AtomicU64::new(0)),
            snapshot: Arc::new(RwLock::new(Snapshot::default())),
        };

        tokio::spawn(drain_events(
            handler.username.clone(),
            events,
            handler.events_received.clone(),
            handler.snapshot.clone(),
        ));

        handler
    }

    pub fn events_received(&self) -> u64 {
        self.events_received.load(Ordering::SeqCst)
    }
}

async fn drain_events(
    username: String,
    mut events: mpsc::Receiver<Event>,
    counter: Arc<AtomicU64>,
    snapshot: Arc<RwLock<Snapshot>>,
) {
    while let Some(event) = events.recv().await {
        let mut state = snapshot.write().await;
        state.resync_requested |= event.refresh != 0;
        state.last_event = Some(event.id);
        state.last_event_at = Some(Utc::now());
        counter.fetch_add(1, Ordering::SeqCst);
    }

    tracing::debug!("Event stream for {} closed", username);
}

#[async_trait]
impl ProtocolHandler for StatusHandler {
    async fn serve(&self, request: Request) -> Response {
        let relay = self.snapshot.read().await.clone();

        Json(StatusResponse {
            username: self.username.clone(),
            keys: self.keys.len(),
            fingerprints: self.keys.keys.iter().map(|k| k.fingerprint.clone()).collect(),
            events_received: self.events_received(),
            relay,
            method: request.method().to_string(),
            path: request.uri().path().to_string(),
        })
        .into_response()
    }
}

/// Builds a [`StatusHandler`] per session.
#[derive(Debug, Default, Clone)]
pub struct StatusHandlerFactory;

impl HandlerFactory<dyn ProtocolHandler> for StatusHandlerFactory {
    fn build(&self, ctx: HandlerContext) -> Arc<dyn ProtocolHandler> {
        Arc::new(StatusHandler::new(ctx.username, ctx.keys, ctx.events))
    }
}
