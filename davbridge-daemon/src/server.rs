//! Gateway server lifecycle.

use anyhow::{Context, Result};
use davbridge_core::{Bridge, CredentialVault, HttpUpstreamFactory};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::DaemonConfig;
use crate::gateway::{self, SharedBridge};
use crate::handler::{ProtocolHandler, StatusHandlerFactory};

/// Upper bound on the time between idle sweeps.
const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Handle to a running gateway server
pub struct ServerHandle {
    local_addr: SocketAddr,
    bridge: SharedBridge,
    cancel: CancellationToken,
    join_handle: Mutex<Option<JoinHandle<Result<()>>>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

/// Build the bridge described by `config` with the default protocol handler.
pub fn build_bridge(config: &DaemonConfig) -> Result<SharedBridge> {
    let upstream = HttpUpstreamFactory::new(config.upstream.clone())
        .with_context(|| format!("Invalid upstream configuration in {:?}", config.config_path))?;

    let bridge: Bridge<dyn ProtocolHandler> = Bridge::new(
        Arc::new(CredentialVault::new(&config.vault_path)),
        Arc::new(upstream),
        Arc::new(StatusHandlerFactory),
        config.bridge_options()?,
    );

    Ok(Arc::new(bridge))
}

/// Start the gateway on `addr`.
///
/// # Parameters
///
/// - `addr`: Address to bind; port `0` picks a free port
/// - `bridge`: Session resolver shared by all requests
/// - `idle_timeout`: Evict sessions unused for this long, if set
///
/// # Returns
///
/// A handle to the running server that can be used to stop it.
pub async fn start_server(
    addr: SocketAddr,
    bridge: SharedBridge,
    idle_timeout: Option<Duration>,
) -> Result<ServerHandle> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    let local_addr = listener
        .local_addr()
        .context("Failed to read bound address")?;

    let cancel = CancellationToken::new();
    let router = gateway::router(bridge.clone());

    let shutdown = cancel.clone();
    let server_task: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                debug!("Server shutdown signal received");
            })
            .await
            .context("Gateway server error")
    });

    let sweeper =
        idle_timeout.map(|max_idle| spawn_idle_sweeper(bridge.clone(), max_idle, cancel.clone()));

    info!("Listening on http://{}", local_addr);

    Ok(ServerHandle {
        local_addr,
        bridge,
        cancel,
        join_handle: Mutex::new(Some(server_task)),
        sweeper: Mutex::new(sweeper),
    })
}

/// Periodically evict sessions idle for longer than `max_idle`.
fn spawn_idle_sweeper(
    bridge: SharedBridge,
    max_idle: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let period = max_idle.min(MAX_SWEEP_INTERVAL);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let evicted = bridge.evict_idle(max_idle);
                    if !evicted.is_empty() {
                        debug!("Idle sweep evicted {} session(s)", evicted.len());
                    }
                }
            }
        }
    })
}

impl ServerHandle {
    /// Address the server is listening on
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn bridge(&self) -> &SharedBridge {
        &self.bridge
    }

    /// Stop accepting requests, wait for in-flight ones, then close all sessions.
    pub async fn stop(&self) -> Result<()> {
        self.cancel.cancel();

        if let Some(sweeper) = self.sweeper.lock().await.take()
            && let Err(e) = sweeper.await
        {
            warn!("Idle sweeper task failed: {}", e);
        }

        if let Some(handle) = self.join_handle.lock().await.take() {
            // If the task panicked, surface the error
            handle.await??;
        }

        self.bridge.shutdown();
        Ok(())
    }
}

/// Run the gateway described by `config` until Ctrl+C.
pub async fn run(config: DaemonConfig) -> Result<()> {
    let bridge = build_bridge(&config)?;
    info!("Using vault at {:?}", config.vault_path);

    let handle = start_server(config.listen_addr()?, bridge, config.idle_timeout()).await?;

    info!("Gateway running. Press Ctrl+C to stop.");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    info!("Shutdown signal received, stopping server...");

    handle.stop().await?;

    info!("Gateway stopped");
    Ok(())
}
