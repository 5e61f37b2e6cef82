//! Daemon configuration handling.

use anyhow::{Context, Result, bail};
use davbridge_core::{BridgeOptions, MAX_POLL_INTERVAL, UpstreamConfig};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding the listening port.
pub const PORT_ENV: &str = "PORT";

/// Environment variable overriding the upstream root URL.
pub const UPSTREAM_URL_ENV: &str = "DAVBRIDGE_UPSTREAM_URL";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Loopback address the gateway binds to.
    pub listen_host: String,

    /// Port the gateway listens on.
    pub port: u16,

    /// Path to the configuration file that was loaded.
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Path to the encrypted credential vault.
    pub vault_path: PathBuf,

    /// Seconds between upstream event polls.
    pub poll_interval_secs: u64,

    /// Seconds a session may sit unused before it is evicted. `0` disables eviction.
    pub idle_timeout_secs: u64,

    /// Logging level.
    pub log_level: String,

    /// Upstream API endpoint and client identification.
    pub upstream: UpstreamConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        let vault_path = project_dirs()
            .map(|d| d.data_dir().join("auth.json"))
            .unwrap_or_else(|| PathBuf::from(".davbridge").join("auth.json"));

        Self {
            listen_host: "127.0.0.1".to_string(),
            port: 8080,
            config_path: PathBuf::new(),
            vault_path,
            poll_interval_secs: 60,
            idle_timeout_secs: 12 * 60 * 60,
            log_level: "info".to_string(),
            upstream: UpstreamConfig::default(),
        }
    }
}

impl DaemonConfig {
    /// Apply environment overrides, looking each variable up through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup(PORT_ENV) {
            self.port = port
                .trim()
                .parse()
                .with_context(|| format!("Invalid {} value {:?}", PORT_ENV, port))?;
        }

        if let Some(url) = lookup(UPSTREAM_URL_ENV)
            && !url.trim().is_empty()
        {
            self.upstream.root_url = url;
        }

        Ok(())
    }

    /// Socket address the gateway binds to. Only loopback hosts are accepted.
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .listen_host
            .trim()
            .parse()
            .with_context(|| format!("Invalid listen host {:?}", self.listen_host))?;
        if !ip.is_loopback() {
            bail!("listen_host must be a loopback address, got {}", ip);
        }
        Ok(SocketAddr::new(ip, self.port))
    }

    pub fn poll_interval(&self) -> Result<Duration> {
        if self.poll_interval_secs == 0 {
            bail!("poll_interval_secs must be greater than zero");
        }
        if self.poll_interval_secs > MAX_POLL_INTERVAL.as_secs() {
            bail!(
                "poll_interval_secs must be at most {}",
                MAX_POLL_INTERVAL.as_secs()
            );
        }
        Ok(Duration::from_secs(self.poll_interval_secs))
    }

    /// Idle timeout, or `None` when eviction is disabled.
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    pub fn bridge_options(&self) -> Result<BridgeOptions> {
        Ok(BridgeOptions {
            poll_interval: self.poll_interval()?,
            ..BridgeOptions::default()
        })
    }
}

/// Default location of the configuration file.
pub fn default_config_path() -> PathBuf {
    project_dirs()
        .map(|d| d.config_dir().join("daemon.toml"))
        .unwrap_or_else(|| PathBuf::from("davbridge-daemon.toml"))
}

/// Load configuration from the default location or create defaults.
pub fn load_config() -> Result<DaemonConfig> {
    load_config_from(&default_config_path())
}

/// Load configuration from `config_path`, falling back to defaults when the
/// file does not exist. Environment overrides are applied last.
pub fn load_config_from(config_path: &Path) -> Result<DaemonConfig> {
    let mut config = read_config_file(config_path)?;
    config.apply_overrides(|key| std::env::var(key).ok())?;

    if let Some(parent) = config.vault_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create data directory {:?}", parent))?;
    }

    Ok(config)
}

fn read_config_file(config_path: &Path) -> Result<DaemonConfig> {
    let mut config = if config_path.exists() {
        let contents = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config from {:?}", config_path))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config from {:?}", config_path))?
    } else {
        DaemonConfig::default()
    };

    config.config_path = config_path.to_path_buf();
    Ok(config)
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "raibid-labs", "davbridge")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = DaemonConfig::default();
        assert_eq!(config.listen_host, "127.0.0.1");
        assert_eq!(config.port, 8080);
        assert_eq!(config.poll_interval().unwrap(), Duration::from_secs(60));
        assert_eq!(config.idle_timeout(), Some(Duration::from_secs(43200)));
        assert!(config.vault_path.ends_with("auth.json"));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("daemon.toml");

        let config = read_config_file(&path).unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.config_path, path);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("daemon.toml");
        std::fs::write(
            &path,
            r#"
port = 9090
idle_timeout_secs = 0

[upstream]
root_url = "https://api.example.com"
"#,
        )
        .unwrap();

        let config = read_config_file(&path).unwrap();

        assert_eq!(config.port, 9090);
        assert_eq!(config.listen_host, "127.0.0.1");
        assert_eq!(config.idle_timeout(), None);
        assert_eq!(config.upstream.root_url, "https://api.example.com");
        assert!(!config.upstream.client_id.is_empty());
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("daemon.toml");
        std::fs::write(&path, "port = \"not a number\"").unwrap();

        assert!(read_config_file(&path).is_err());
    }

    #[test]
    fn test_port_env_overrides_file() {
        let mut config = DaemonConfig {
            port: 9090,
            ..DaemonConfig::default()
        };

        config.apply_overrides(env(&[("PORT", "1143")])).unwrap();
        assert_eq!(config.port, 1143);
        assert_eq!(config.listen_addr().unwrap().to_string(), "127.0.0.1:1143");
    }

    #[test]
    fn test_listen_host_must_be_loopback() {
        let config = DaemonConfig {
            listen_host: "::1".to_string(),
            ..DaemonConfig::default()
        };
        assert_eq!(config.listen_addr().unwrap().to_string(), "[::1]:8080");

        for host in ["0.0.0.0", "192.168.1.10", "::", "not-an-ip"] {
            let config = DaemonConfig {
                listen_host: host.to_string(),
                ..DaemonConfig::default()
            };
            assert!(config.listen_addr().is_err(), "host {:?}", host);
        }
    }

    #[test]
    fn test_invalid_port_env_is_an_error() {
        let mut config = DaemonConfig::default();
        assert!(config.apply_overrides(env(&[("PORT", "eighty")])).is_err());
    }

    #[test]
    fn test_upstream_url_env() {
        let mut config = DaemonConfig::default();

        config
            .apply_overrides(env(&[("DAVBRIDGE_UPSTREAM_URL", "http://localhost:9000")]))
            .unwrap();
        assert_eq!(config.upstream.root_url, "http://localhost:9000");

        // Empty values are ignored.
        config
            .apply_overrides(env(&[("DAVBRIDGE_UPSTREAM_URL", "  ")]))
            .unwrap();
        assert_eq!(config.upstream.root_url, "http://localhost:9000");
    }

    #[test]
    fn test_zero_poll_interval_is_rejected() {
        let config = DaemonConfig {
            poll_interval_secs: 0,
            ..DaemonConfig::default()
        };
        assert!(config.bridge_options().is_err());
    }

    #[test]
    fn test_oversized_poll_interval_is_rejected() {
        let config = DaemonConfig {
            poll_interval_secs: u64::MAX,
            ..DaemonConfig::default()
        };
        assert!(config.bridge_options().is_err());

        let config = DaemonConfig {
            poll_interval_secs: MAX_POLL_INTERVAL.as_secs(),
            ..DaemonConfig::default()
        };
        assert_eq!(config.poll_interval().unwrap(), MAX_POLL_INTERVAL);
    }
}
