//! Runtime configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::port::DEFAULT_PORT_CAPACITY;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("server not set")]
    MissingServer,
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
    #[error("port capacity must be at least 1")]
    ZeroCapacity,
}

/// Daemon connection settings.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Name of the host this daemon runs on.
    pub server: String,
    /// Control endpoint (`ws://`, `wss://`, `tcp://` or `unix://`).
    pub url: String,
    pub keepalive_interval: Duration,
    /// How long an in-flight handler may run after the connection closes.
    pub shutdown_grace: Duration,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            server: String::new(),
            url: "ws://localhost:8082/".to_string(),
            keepalive_interval: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl DaemonConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.trim().is_empty() {
            return Err(ConfigError::MissingServer);
        }
        if self.keepalive_interval.is_zero() {
            return Err(ConfigError::ZeroDuration("keepalive interval"));
        }
        Ok(())
    }
}

/// Where hosts live on disk: one directory per host under `root`.
#[derive(Debug, Clone)]
pub struct HostConfig {
    pub root: PathBuf,
    /// Host that files are deployed from.
    pub home: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("hosts"),
            home: "home".to_string(),
        }
    }
}

impl HostConfig {
    pub fn host_dir(&self, host: &str) -> PathBuf {
        self.root.join(host)
    }
}

#[derive(Debug, Clone)]
pub struct PortConfig {
    pub dir: PathBuf,
    pub capacity: usize,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("hosts/.ports"),
            capacity: DEFAULT_PORT_CAPACITY,
        }
    }
}

impl PortConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daemon_defaults() {
        let config = DaemonConfig::default();
        assert_eq!(config.url, "ws://localhost:8082/");
        assert_eq!(config.keepalive_interval, Duration::from_secs(5));
        assert_eq!(config.shutdown_grace, Duration::from_secs(5));
    }

    #[test]
    fn missing_server_is_rejected() {
        let err = DaemonConfig::default().validate().unwrap_err();
        assert_eq!(err.to_string(), "server not set");

        let config = DaemonConfig {
            server: "home".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_keepalive_is_rejected() {
        let config = DaemonConfig {
            server: "home".to_string(),
            keepalive_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::ZeroDuration(_))));
    }

    #[test]
    fn host_and_port_defaults() {
        let hosts = HostConfig::default();
        assert_eq!(hosts.host_dir("n00dles"), PathBuf::from("hosts/n00dles"));
        assert_eq!(hosts.home, "home");

        let ports = PortConfig::default();
        assert_eq!(ports.capacity, 50);
        assert!(ports.validate().is_ok());
        assert!(PortConfig { capacity: 0, ..ports }.validate().is_err());
    }
}
