//! Server configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::constants::{
    DEFAULT_DELIVERY_CAPACITY, DEFAULT_HOST, DEFAULT_MAX_CLIENTS, DEFAULT_MAX_LINE_LEN,
    DEFAULT_MAX_ROOMS, DEFAULT_PORT, DEFAULT_ROUTER_CAPACITY, DEFAULT_SHUTDOWN_TIMEOUT_MS,
};
use crate::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address to bind
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Maximum number of connected clients
    pub max_clients: usize,

    /// Maximum number of concurrent rooms, lobby included
    pub max_rooms: usize,

    /// Longest accepted request line in bytes
    pub max_line_len: usize,

    /// Outbound lines queued per client before it is evicted
    pub delivery_capacity: usize,

    /// Commands queued in front of the router
    pub router_capacity: usize,

    /// Grace period for sessions to close during shutdown
    pub shutdown_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            max_clients: DEFAULT_MAX_CLIENTS,
            max_rooms: DEFAULT_MAX_ROOMS,
            max_line_len: DEFAULT_MAX_LINE_LEN,
            delivery_capacity: DEFAULT_DELIVERY_CAPACITY,
            router_capacity: DEFAULT_ROUTER_CAPACITY,
            shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT_MS,
        }
    }
}

impl Config {
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content).map_err(|e| Error::Config(e.to_string()))?
        } else {
            Config::default()
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("max_clients", self.max_clients),
            ("max_rooms", self.max_rooms),
            ("max_line_len", self.max_line_len),
            ("delivery_capacity", self.delivery_capacity),
            ("router_capacity", self.router_capacity),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(Error::Config(format!("{key} must be greater than zero")));
            }
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}
