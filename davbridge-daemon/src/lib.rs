//! Davbridge Daemon Library
//!
//! This library exposes the gateway, its configuration and the server
//! runner for the `davbridged` and `davbridge` binaries and for testing.

pub mod config;
pub mod gateway;
pub mod handler;
pub mod logging;
pub mod server;

pub use config::{DaemonConfig, load_config, load_config_from};
pub use gateway::{GatewayError, SharedBridge, router};
pub use handler::{ProtocolHandler, StatusHandler, StatusHandlerFactory};
pub use server::{ServerHandle, build_bridge, run, start_server};
