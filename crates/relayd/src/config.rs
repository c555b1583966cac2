//! Listener configuration.
//!
//! The relay needs one thing: where to listen. Defaults come first, then
//! `RELAY_HOST` / `RELAY_PORT` from the environment, then command-line
//! flags (applied by the binary).

use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use thiserror::Error;

/// Default listening port.
pub const DEFAULT_PORT: u16 = 9001;

/// Environment variable overriding the listen host.
pub const HOST_ENV: &str = "RELAY_HOST";

/// Environment variable overriding the listen port.
pub const PORT_ENV: &str = "RELAY_PORT";

/// Where the relay listens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayConfig {
    /// Interface to bind
    pub host: IpAddr,
    /// TCP port (0 = pick a free port)
    pub port: u16,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
        }
    }
}

impl RelayConfig {
    /// Builds a config from the defaults plus the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from the defaults plus values returned by `lookup`.
    ///
    /// Unset or empty values keep the default.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup(HOST_ENV).filter(|v| !v.is_empty()) {
            config.host = value.parse().map_err(|_| ConfigError::InvalidHost(value))?;
        }

        if let Some(value) = lookup(PORT_ENV).filter(|v| !v.is_empty()) {
            config.port = value.parse().map_err(|_| ConfigError::InvalidPort(value))?;
        }

        Ok(config)
    }

    /// Returns the socket address to bind.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

/// Errors from reading configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid RELAY_HOST value: {0:?} (expected an IP address)")]
    InvalidHost(String),

    #[error("invalid RELAY_PORT value: {0:?} (expected 0-65535)")]
    InvalidPort(String),
}
