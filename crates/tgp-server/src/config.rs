//! Server configuration.
//!
//! Loaded from TOML; every field has a default so an empty file is valid.
//!
//! ```toml
//! bind_addr = "0.0.0.0:8080"
//! heartbeat_interval_secs = 10
//!
//! [scheduler]
//! heartbeat_timeout_secs = 90
//! max_requeues = 1
//!
//! [scheduler.pricing]
//! utilization_factor = 1.0
//!
//! [scheduler.latency]
//! base_ms = 50
//! home_zone = "eu-west"
//! remote_zone_penalty_ms = 120
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tgp_scheduler::{LatencyConfig, PricingPolicy, SchedulerConfig};

use crate::error::{ServerError, ServerResult};

/// Default port.
pub const DEFAULT_PORT: u16 = 8080;

/// Default maximum WebSocket message size: 1MB.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Default number of concurrent connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 1000;

/// Default interval workers are told to heartbeat at.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Configuration for the scheduler daemon.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the WebSocket server to.
    pub bind_addr: SocketAddr,
    /// Maximum number of concurrent connections.
    pub max_connections: usize,
    /// Largest accepted text frame, in bytes.
    pub max_message_size: usize,
    /// Heartbeat interval handed to workers on registration.
    pub heartbeat_interval: Duration,
    /// Scheduler tuning.
    pub scheduler: SchedulerConfig,
}

impl ServerConfig {
    /// Create a configuration bound to `bind_addr` with default settings.
    #[must_use]
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            scheduler: SchedulerConfig::default(),
        }
    }

    /// Set the bind address.
    #[must_use]
    pub const fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub const fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the maximum message size.
    #[must_use]
    pub const fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Set the worker heartbeat interval.
    #[must_use]
    pub const fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set the scheduler configuration.
    #[must_use]
    pub fn with_scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Heartbeat interval in whole seconds, at least 1.
    #[must_use]
    pub fn heartbeat_interval_secs(&self) -> u64 {
        self.heartbeat_interval.as_secs().max(1)
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is invalid.
    pub fn from_file(path: impl AsRef<Path>) -> ServerResult<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ServerError::Config(format!(
                "failed to read config file '{}': {e}",
                path.as_ref().display()
            ))
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed or the values are invalid.
    pub fn from_toml(content: &str) -> ServerResult<Self> {
        let file: ConfigFile =
            toml::from_str(content).map_err(|e| ServerError::Config(format!("invalid TOML: {e}")))?;
        let config = file.into_config();
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any value is out of range.
    pub fn validate(&self) -> ServerResult<()> {
        if self.max_connections == 0 {
            return Err(ServerError::Config("max_connections must be at least 1".into()));
        }
        if self.max_message_size == 0 {
            return Err(ServerError::Config("max_message_size must be positive".into()));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(ServerError::Config("heartbeat_interval must be positive".into()));
        }
        if self.heartbeat_interval >= self.scheduler.suspect_after {
            return Err(ServerError::Config(format!(
                "heartbeat_interval ({}s) must be shorter than suspect_after ({}s)",
                self.heartbeat_interval.as_secs(),
                self.scheduler.suspect_after.as_secs()
            )));
        }
        self.scheduler.validate().map_err(ServerError::Config)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT))
    }
}

/// On-disk layout. Durations are whole seconds.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    bind_addr: Option<SocketAddr>,
    max_connections: Option<usize>,
    max_message_size: Option<usize>,
    heartbeat_interval_secs: Option<u64>,
    scheduler: SchedulerSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SchedulerSection {
    max_placement_attempts: Option<u32>,
    max_requeues: Option<u32>,
    heartbeat_timeout_secs: Option<u64>,
    suspect_after_secs: Option<u64>,
    result_timeout_secs: Option<u64>,
    monitor_interval_secs: Option<u64>,
    pricing: Option<PricingPolicy>,
    latency: Option<LatencyConfig>,
}

impl ConfigFile {
    fn into_config(self) -> ServerConfig {
        let mut config = ServerConfig::default();
        if let Some(addr) = self.bind_addr {
            config.bind_addr = addr;
        }
        if let Some(max) = self.max_connections {
            config.max_connections = max;
        }
        if let Some(size) = self.max_message_size {
            config.max_message_size = size;
        }
        if let Some(secs) = self.heartbeat_interval_secs {
            config.heartbeat_interval = Duration::from_secs(secs);
        }
        config.scheduler = self.scheduler.into_config();
        config
    }
}

impl SchedulerSection {
    fn into_config(self) -> SchedulerConfig {
        let mut config = SchedulerConfig::default();
        if let Some(n) = self.max_placement_attempts {
            config.max_placement_attempts = n;
        }
        if let Some(n) = self.max_requeues {
            config.max_requeues = n;
        }
        if let Some(secs) = self.heartbeat_timeout_secs {
            config.heartbeat_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.suspect_after_secs {
            config.suspect_after = Duration::from_secs(secs);
        }
        if let Some(secs) = self.result_timeout_secs {
            config.result_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.monitor_interval_secs {
            config.monitor_interval = Duration::from_secs(secs);
        }
        if let Some(pricing) = self.pricing {
            config.pricing = pricing;
        }
        if let Some(latency) = self.latency {
            config.latency = latency;
        }
        config
    }
}
