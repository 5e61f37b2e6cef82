//! Davbridge Daemon
//!
//! Local gateway that unlocks enrolled accounts on demand and serves them
//! over HTTP with Basic authentication.
//!
//! # Running
//!
//! ```bash
//! cargo run -p davbridge-daemon
//! # or after install:
//! davbridged
//! ```

use anyhow::Result;
use davbridge_daemon::{config, logging, server};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::load_config()?;
    logging::init_logging(&config.log_level);

    info!("Starting davbridge daemon...");
    info!("Loaded configuration from {:?}", config.config_path);

    server::run(config).await
}
