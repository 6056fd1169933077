//! Relay configuration.
//!
//! Every field has a default, so an empty TOML file (or none at all) yields a working relay on
//! `0.0.0.0:52000`. The binary applies command-line overrides on top and then calls
//! [`RelayConfig::validate`].

use crate::error::{RelayError, Result};
use crate::logging::LogFormat;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Port the relay listens on by default.
pub const DEFAULT_PORT: u16 = 52000;

/// Channel capacities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueConfig {
    /// Messages buffered per endpoint before further messages are dropped for it.
    pub endpoint_capacity: usize,
    /// Messages buffered between inbound directions and the distributor.
    pub inbound_capacity: usize,
    /// Accepted connections waiting to join the live set.
    pub registration_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            endpoint_capacity: 1,
            inbound_capacity: 64,
            registration_capacity: 1,
        }
    }
}

/// Dead-endpoint sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReaperConfig {
    /// Milliseconds between sweeps.
    pub interval_ms: u64,
}

impl ReaperConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self { interval_ms: 10_000 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolConfig {
    /// Line buffers created up front.
    pub preallocate: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    /// Filter directive used when `RUST_LOG` is unset, e.g. `info` or `fanout_relay=debug`.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// Top-level relay configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelayConfig {
    /// Address the listener binds to.
    pub listen: SocketAddr,
    pub queues: QueueConfig,
    pub reaper: ReaperConfig,
    pub pool: PoolConfig,
    pub logging: LogConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            queues: QueueConfig::default(),
            reaper: ReaperConfig::default(),
            pool: PoolConfig::default(),
            logging: LogConfig::default(),
        }
    }
}

impl RelayConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Read and parse a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|err| RelayError::io(err, format!("reading {}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Reject values the relay cannot run with.
    pub fn validate(&self) -> Result<()> {
        let capacities = [
            ("queues.endpoint_capacity", self.queues.endpoint_capacity),
            ("queues.inbound_capacity", self.queues.inbound_capacity),
            ("queues.registration_capacity", self.queues.registration_capacity),
        ];
        for (parameter, capacity) in capacities {
            // A zero-capacity queue is a rendezvous channel, which would make offers always fail.
            if capacity == 0 {
                return Err(RelayError::config(parameter, "must be at least 1"));
            }
        }
        if self.reaper.interval_ms == 0 {
            return Err(RelayError::config(
                "reaper.interval_ms",
                "must be greater than 0",
            ));
        }
        if self.logging.level.trim().is_empty() {
            return Err(RelayError::config("logging.level", "must not be empty"));
        }
        Ok(())
    }
}
