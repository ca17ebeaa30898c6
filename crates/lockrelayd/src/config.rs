//! Daemon configuration.
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! environment variables. Command line flags are applied last by the binary.
//!
//! ```toml
//! listen_addr = "0.0.0.0:3015"
//! handshake_timeout_secs = 60
//! heartbeat_interval_secs = 30
//! notify_command = ["notify-send", "-u", "critical"]
//! notify_queue = 64
//! state_dir = "/var/lib/lockrelay"
//! ```

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::notify::{CommandNotifier, LogNotifier, Notifier, DEFAULT_QUEUE_CAPACITY};
use crate::server::Liveness;

/// Default listen address
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:3015";

/// Default time a new connection has to announce its role
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 60;

/// Default outbound silence before a heartbeat
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Full listen address override
pub const ENV_ADDR: &str = "LOCKRELAY_ADDR";

/// Port override, keeps the configured host
pub const ENV_PORT: &str = "PORT";

/// Errors loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {error}")]
    Read { path: PathBuf, error: String },

    #[error("Invalid config: {0}")]
    Parse(String),

    #[error("Invalid listen address `{value}`")]
    InvalidAddress { value: String },
}

/// Relay daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelayConfig {
    /// Address the TCP server binds
    pub listen_addr: String,

    /// Seconds a connection may stay silent before announcing a role
    pub handshake_timeout_secs: u64,

    /// Seconds without outbound traffic before a heartbeat is written
    pub heartbeat_interval_secs: u64,

    /// Program and leading arguments run for each push notification
    pub notify_command: Option<Vec<String>>,

    /// Depth of the notification queue
    pub notify_queue: usize,

    /// Directory for the PID and log files
    pub state_dir: Option<PathBuf>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            handshake_timeout_secs: DEFAULT_HANDSHAKE_TIMEOUT_SECS,
            heartbeat_interval_secs: DEFAULT_HEARTBEAT_INTERVAL_SECS,
            notify_command: None,
            notify_queue: DEFAULT_QUEUE_CAPACITY,
            state_dir: None,
        }
    }
}

impl RelayConfig {
    /// Loads configuration from the process environment.
    ///
    /// An explicit `path` must exist. Without one, the default path is read
    /// if present and skipped otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Reads and parses a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        debug!(path = %path.display(), "Loaded config file");
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// `$XDG_CONFIG_HOME/lockrelay/lockrelayd.toml` or the platform equivalent.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("lockrelay").join("lockrelayd.toml"))
    }

    /// Overlays environment variables read through `lookup`.
    ///
    /// `PORT` replaces only the port; `LOCKRELAY_ADDR` replaces the whole
    /// address and wins when both are set.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup(ENV_PORT).filter(|p| !p.trim().is_empty()) {
            let port: u16 = port.trim().parse().map_err(|_| ConfigError::InvalidAddress {
                value: format!("{ENV_PORT}={port}"),
            })?;
            let mut addr = self.listen_socket_addr()?;
            addr.set_port(port);
            self.listen_addr = addr.to_string();
        }

        if let Some(addr) = lookup(ENV_ADDR).filter(|a| !a.trim().is_empty()) {
            self.listen_addr = addr.trim().to_string();
        }

        Ok(())
    }

    /// Parses `listen_addr`.
    pub fn listen_socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.listen_addr
            .parse()
            .map_err(|_| ConfigError::InvalidAddress {
                value: self.listen_addr.clone(),
            })
    }

    /// Where a local client reaches this relay: wildcard hosts become loopback.
    pub fn client_addr(&self) -> Result<SocketAddr, ConfigError> {
        let mut addr = self.listen_socket_addr()?;
        match addr.ip() {
            IpAddr::V4(ip) if ip.is_unspecified() => addr.set_ip(Ipv4Addr::LOCALHOST.into()),
            IpAddr::V6(ip) if ip.is_unspecified() => addr.set_ip(Ipv6Addr::LOCALHOST.into()),
            _ => {}
        }
        Ok(addr)
    }

    /// Configured `state_dir`, else `$XDG_STATE_HOME/lockrelay` or the
    /// platform equivalent, else a directory under the system temp dir.
    pub fn state_dir(&self) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(|| {
            dirs::state_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("lockrelay")
        })
    }

    pub fn pid_file(&self) -> PathBuf {
        self.state_dir().join("lockrelayd.pid")
    }

    pub fn log_file(&self) -> PathBuf {
        self.state_dir().join("lockrelayd.log")
    }

    pub fn liveness(&self) -> Liveness {
        Liveness {
            handshake_timeout: Duration::from_secs(self.handshake_timeout_secs.max(1)),
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs.max(1)),
        }
    }

    /// Builds the notifier: the configured command, or log-only.
    pub fn notifier(&self) -> Arc<dyn Notifier> {
        match self
            .notify_command
            .as_deref()
            .and_then(CommandNotifier::from_argv)
        {
            Some(command) => Arc::new(command),
            None => Arc::new(LogNotifier),
        }
    }
}
