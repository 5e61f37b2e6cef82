//! Per-session upstream event polling.
//!
//! An [`EventRelay`] polls the upstream on a fixed interval and forwards
//! every event whose id differs from the last one seen. It owns only the
//! sending half of the handler's channel, so events arrive in upstream
//! order and the handler decides what to do with them.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::model::{Event, EventId};
use crate::upstream::UpstreamClient;

/// Default polling interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Longest accepted polling interval.
pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Polls one upstream client for events.
pub struct EventRelay {
    client: Arc<dyn UpstreamClient>,
    interval: Duration,
}

impl EventRelay {
    /// `interval` is clamped to at most [`MAX_POLL_INTERVAL`] and at least
    /// one millisecond.
    pub fn new(client: Arc<dyn UpstreamClient>, interval: Duration) -> Self {
        Self {
            client,
            interval: interval.clamp(MIN_POLL_INTERVAL, MAX_POLL_INTERVAL),
        }
    }

    /// Start polling after `last` in a background task.
    ///
    /// The first poll happens one interval after the call. The task exits
    /// when `cancel` fires or when the receiving half of `tx` is dropped.
    pub fn spawn(
        self,
        username: impl Into<String>,
        last: EventId,
        tx: mpsc::Sender<Event>,
        cancel: CancellationToken,
    ) -> RelayHandle {
        let username = username.into();
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            self.run(&username, last, tx, token).await;
        });

        RelayHandle { cancel, task }
    }

    async fn run(
        self,
        username: &str,
        mut last: EventId,
        tx: mpsc::Sender<Event>,
        cancel: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::debug!("Event relay started for {} at {}", username, last);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let fetched = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.client.get_event(&last) => result,
            };

            let event = match fetched {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!("Failed to poll events for {}: {}", username, e);
                    continue;
                }
            };

            if event.id == last {
                continue;
            }

            tracing::debug!("New event {} for {}", event.id, username);
            last = event.id.clone();

            let sent = tokio::select! {
                _ = cancel.cancelled() => break,
                result = tx.send(event) => result,
            };
            if sent.is_err() {
                tracing::debug!("Event receiver for {} dropped", username);
                break;
            }
        }

        tracing::debug!("Event relay stopped for {}", username);
    }
}

/// Handle to a running relay task.
#[derive(Debug)]
pub struct RelayHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl RelayHandle {
    /// Signal the relay to stop without waiting for it.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled() || self.task.is_finished()
    }

    /// Stop the relay and wait for its task to exit.
    pub async fn join(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::warn!("Event relay task failed: {}", e);
        }
    }
}
