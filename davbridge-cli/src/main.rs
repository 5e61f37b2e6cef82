//! Davbridge CLI
//!
//! Enrolls accounts into the local vault and runs the gateway.
//!
//! # Usage
//!
//! ```bash
//! # Log in once and print the bridge password for alice
//! davbridge auth alice
//!
//! # Run the gateway
//! davbridge
//!
//! # Forget alice's stored credentials
//! davbridge logout alice
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use davbridge_core::{Authenticator, CredentialVault, HttpUpstream, enroll};
use davbridge_daemon::config::{self, DaemonConfig};
use davbridge_daemon::{logging, server};
use tracing::info;

mod prompt;

use prompt::TerminalPrompt;

#[derive(Debug, Parser)]
#[command(name = "davbridge")]
#[command(about = "Local CardDAV/CalDAV gateway with per-user bridge passwords")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Runs the gateway when omitted
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Log in to an account and print its bridge password
    Auth {
        /// Account username
        username: String,
    },

    /// Remove an account's stored credentials
    Logout {
        /// Account username
        username: String,
    },

    /// List enrolled accounts
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => config::load_config_from(path)?,
        None => config::load_config()?,
    };

    let level = if cli.verbose { "debug" } else { config.log_level.as_str() };
    logging::init_logging(level);

    match cli.command {
        None => {
            info!("Loaded configuration from {:?}", config.config_path);
            server::run(config).await
        }
        Some(Commands::Auth { username }) => auth(&config, &username).await,
        Some(Commands::Logout { username }) => logout(&vault(&config), &username).await,
        Some(Commands::List) => list(&vault(&config)).await,
    }
}

fn vault(config: &DaemonConfig) -> CredentialVault {
    CredentialVault::new(&config.vault_path)
}

async fn auth(config: &DaemonConfig, username: &str) -> Result<()> {
    let client = HttpUpstream::new(config.upstream.clone())
        .context("Upstream is not configured; set upstream.root_url or DAVBRIDGE_UPSTREAM_URL")?;
    let authenticator = Authenticator::new(Arc::new(client));

    let key = enroll(&authenticator, &vault(config), username, &mut TerminalPrompt)
        .await
        .with_context(|| format!("Failed to enroll {}", username))?;

    println!("Bridge password: {}", key.to_base64().expose());
    Ok(())
}

async fn logout(vault: &CredentialVault, username: &str) -> Result<()> {
    let removed = vault
        .remove(username)
        .await
        .with_context(|| format!("Failed to update vault at {:?}", vault.path()))?;

    if removed {
        println!("Removed {}", username);
    } else {
        println!("{} is not enrolled", username);
    }
    Ok(())
}

async fn list(vault: &CredentialVault) -> Result<()> {
    let usernames = vault
        .usernames()
        .await
        .with_context(|| format!("Failed to read vault at {:?}", vault.path()))?;

    if usernames.is_empty() {
        println!("No accounts enrolled");
    }
    for username in usernames {
        println!("{}", username);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;
    use davbridge_core::upstream::mock::{MockUpstream, ScriptedPrompt};
    use tempfile::TempDir;

    #[test]
    fn test_no_subcommand_runs_gateway() {
        let cli = Cli::try_parse_from(["davbridge"]).unwrap();
        assert!(cli.command.is_none());
        assert!(!cli.verbose);
    }

    #[test]
    fn test_parse_auth() {
        let cli = Cli::try_parse_from(["davbridge", "-v", "auth", "alice"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Some(Commands::Auth { ref username }) if username == "alice"));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli =
            Cli::try_parse_from(["davbridge", "logout", "bob", "--config", "/tmp/d.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/d.toml")));
        assert!(matches!(cli.command, Some(Commands::Logout { .. })));
    }

    #[test]
    fn test_auth_requires_username() {
        let err = Cli::try_parse_from(["davbridge", "auth"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_unknown_subcommand_is_usage_error() {
        let err = Cli::try_parse_from(["davbridge", "frobnicate"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidSubcommand);
        assert_eq!(err.exit_code(), 2);
    }

    #[tokio::test]
    async fn test_logout_removes_entry() {
        let temp = TempDir::new().unwrap();
        let vault = CredentialVault::new(temp.path().join("auth.json"));
        let authenticator = Authenticator::new(Arc::new(MockUpstream::new("pw")));
        enroll(&authenticator, &vault, "alice", &mut ScriptedPrompt::new(&["pw"]))
            .await
            .unwrap();

        logout(&vault, "alice").await.unwrap();
        assert!(vault.entry("alice").await.unwrap().is_none());

        // Logging out twice is not an error.
        logout(&vault, "alice").await.unwrap();
    }

    #[tokio::test]
    async fn test_list_on_missing_vault() {
        let temp = TempDir::new().unwrap();
        let vault = CredentialVault::new(temp.path().join("missing").join("auth.json"));
        list(&vault).await.unwrap();
    }

    #[tokio::test]
    async fn test_auth_without_upstream_fails() {
        let config = DaemonConfig::default();
        assert!(config.upstream.root_url.is_empty());
        assert!(auth(&config, "alice").await.is_err());
    }
}
