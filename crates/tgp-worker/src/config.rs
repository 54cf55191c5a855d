//! Worker configuration.
//!
//! Values come from an optional TOML file, then command-line flags and
//! environment variables override them.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::Deserialize;

use crate::error::{WorkerError, WorkerResult};

/// Default scheduler URL.
pub const DEFAULT_SCHEDULER_URL: &str = "ws://127.0.0.1:8080";

/// Default zone.
pub const DEFAULT_ZONE: &str = "default";

/// Default number of output lines reported back with a result.
pub const DEFAULT_OUTPUT_TAIL_LINES: usize = 50;

/// Container CLI used to run jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ContainerRuntime {
    /// `docker`
    #[default]
    Docker,
    /// `podman`
    Podman,
}

impl ContainerRuntime {
    /// Executable name.
    #[must_use]
    pub const fn binary(self) -> &'static str {
        match self {
            Self::Docker => "docker",
            Self::Podman => "podman",
        }
    }
}

/// Reconnection backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay.
    pub max_delay: Duration,
    /// Growth factor per attempt.
    pub backoff_multiplier: f64,
    /// Give up after this many consecutive failures (`None` = never).
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            max_attempts: None,
        }
    }
}

impl ReconnectConfig {
    /// Delay before attempt number `attempt` (1-based).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let millis = self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        if !millis.is_finite() || millis >= self.max_delay.as_millis() as f64 {
            return self.max_delay;
        }
        Duration::from_millis(millis as u64)
    }

    /// Whether another attempt is allowed after `attempt` failures.
    #[must_use]
    pub fn should_reconnect(&self, attempt: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempt < max)
    }
}

/// Complete worker configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    /// Scheduler WebSocket URL.
    pub scheduler_url: String,
    /// Node id; the hostname when unset.
    pub node_id: Option<String>,
    /// Zone label used by the latency model.
    pub zone: String,
    /// CPU cores offered; detected when unset.
    pub cpu_cores: Option<f64>,
    /// Memory offered in GB; detected when unset.
    pub memory_gb: Option<f64>,
    /// GPUs offered.
    pub gpu_count: u32,
    /// Hourly price of the node.
    pub price_per_hour_usd: f64,
    /// Egress price per GB.
    pub transfer_price_per_gb_usd: f64,
    /// Whether the node is owned hardware.
    pub on_premise: bool,
    /// Value of an idle hour on owned hardware.
    pub idle_opportunity_usd_per_hour: f64,
    /// Container CLI.
    pub runtime: ContainerRuntime,
    /// Output lines kept per job.
    pub output_tail_lines: usize,
    /// Reconnection backoff.
    pub reconnect: ReconnectConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            scheduler_url: DEFAULT_SCHEDULER_URL.to_string(),
            node_id: None,
            zone: DEFAULT_ZONE.to_string(),
            cpu_cores: None,
            memory_gb: None,
            gpu_count: 0,
            price_per_hour_usd: 0.0,
            transfer_price_per_gb_usd: 0.0,
            on_premise: false,
            idle_opportunity_usd_per_hour: 0.0,
            runtime: ContainerRuntime::default(),
            output_tail_lines: DEFAULT_OUTPUT_TAIL_LINES,
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl WorkerConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> WorkerResult<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            WorkerError::Config(format!(
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
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> WorkerResult<Self> {
        let file: ConfigFile =
            toml::from_str(content).map_err(|e| WorkerError::Config(format!("invalid TOML: {e}")))?;
        Ok(file.into_config())
    }

    /// Build the configuration from flags, reading `--config` first.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be loaded or the result is invalid.
    pub fn from_args(args: &WorkerArgs) -> WorkerResult<Self> {
        let mut config = match &args.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        args.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any value is out of range.
    pub fn validate(&self) -> WorkerResult<()> {
        if !self.scheduler_url.starts_with("ws://") && !self.scheduler_url.starts_with("wss://") {
            return Err(WorkerError::Config(format!(
                "scheduler_url must start with ws:// or wss://, got {}",
                self.scheduler_url
            )));
        }
        if self.zone.is_empty() {
            return Err(WorkerError::Config("zone cannot be empty".into()));
        }
        for (name, value) in [
            ("price_per_hour_usd", self.price_per_hour_usd),
            ("transfer_price_per_gb_usd", self.transfer_price_per_gb_usd),
            ("idle_opportunity_usd_per_hour", self.idle_opportunity_usd_per_hour),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(WorkerError::Config(format!(
                    "{name} must be a non-negative number, got {value}"
                )));
            }
        }
        for (name, value) in [("cpu_cores", self.cpu_cores), ("memory_gb", self.memory_gb)] {
            if value.is_some_and(|v| !v.is_finite() || v <= 0.0) {
                return Err(WorkerError::Config(format!("{name} must be positive")));
            }
        }
        if self.output_tail_lines == 0 {
            return Err(WorkerError::Config("output_tail_lines must be at least 1".into()));
        }
        Ok(())
    }
}

/// Command-line flags for `tgp-worker`.
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "tgp-worker", version, about = "TGP scheduler worker agent")]
pub struct WorkerArgs {
    /// TOML configuration file.
    #[arg(long, env = "TGP_WORKER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Scheduler WebSocket URL.
    #[arg(long, env = "TGP_SCHEDULER_URL")]
    pub scheduler: Option<String>,

    /// Node id (defaults to the hostname).
    #[arg(long, env = "TGP_NODE_ID")]
    pub node_id: Option<String>,

    /// Zone label.
    #[arg(long)]
    pub zone: Option<String>,

    /// CPU cores to offer.
    #[arg(long)]
    pub cpu: Option<f64>,

    /// Memory to offer, in GB.
    #[arg(long)]
    pub memory: Option<f64>,

    /// GPUs to offer.
    #[arg(long)]
    pub gpu: Option<u32>,

    /// Hourly price in USD.
    #[arg(long)]
    pub price: Option<f64>,

    /// Egress price per GB in USD.
    #[arg(long)]
    pub transfer_price: Option<f64>,

    /// Mark the node as owned hardware with this idle-hour value in USD.
    #[arg(long)]
    pub on_premise: Option<f64>,

    /// Container CLI.
    #[arg(long, value_enum)]
    pub runtime: Option<ContainerRuntime>,
}

impl WorkerArgs {
    fn apply(&self, config: &mut WorkerConfig) {
        if let Some(url) = &self.scheduler {
            config.scheduler_url.clone_from(url);
        }
        if let Some(id) = &self.node_id {
            config.node_id = Some(id.clone());
        }
        if let Some(zone) = &self.zone {
            config.zone.clone_from(zone);
        }
        if self.cpu.is_some() {
            config.cpu_cores = self.cpu;
        }
        if self.memory.is_some() {
            config.memory_gb = self.memory;
        }
        if let Some(gpu) = self.gpu {
            config.gpu_count = gpu;
        }
        if let Some(price) = self.price {
            config.price_per_hour_usd = price;
        }
        if let Some(price) = self.transfer_price {
            config.transfer_price_per_gb_usd = price;
        }
        if let Some(idle) = self.on_premise {
            config.on_premise = true;
            config.idle_opportunity_usd_per_hour = idle;
        }
        if let Some(runtime) = self.runtime {
            config.runtime = runtime;
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    scheduler_url: Option<String>,
    node_id: Option<String>,
    zone: Option<String>,
    cpu_cores: Option<f64>,
    memory_gb: Option<f64>,
    gpu_count: u32,
    price_per_hour_usd: f64,
    transfer_price_per_gb_usd: f64,
    on_premise: bool,
    idle_opportunity_usd_per_hour: f64,
    runtime: ContainerRuntime,
    output_tail_lines: Option<usize>,
    reconnect_max_delay_secs: Option<u64>,
}

impl ConfigFile {
    fn into_config(self) -> WorkerConfig {
        let defaults = WorkerConfig::default();
        let mut reconnect = defaults.reconnect;
        if let Some(secs) = self.reconnect_max_delay_secs {
            reconnect.max_delay = Duration::from_secs(secs);
        }
        WorkerConfig {
            scheduler_url: self.scheduler_url.unwrap_or(defaults.scheduler_url),
            node_id: self.node_id,
            zone: self.zone.unwrap_or(defaults.zone),
            cpu_cores: self.cpu_cores,
            memory_gb: self.memory_gb,
            gpu_count: self.gpu_count,
            price_per_hour_usd: self.price_per_hour_usd,
            transfer_price_per_gb_usd: self.transfer_price_per_gb_usd,
            on_premise: self.on_premise,
            idle_opportunity_usd_per_hour: self.idle_opportunity_usd_per_hour,
            runtime: self.runtime,
            output_tail_lines: self.output_tail_lines.unwrap_or(defaults.output_tail_lines),
            reconnect,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use test_case::test_case;

    // ==================== Reconnect Tests ====================

    #[test]
    fn test_reconnect_backoff_grows_and_caps() {
        let config = ReconnectConfig::default();
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(4), Duration::from_secs(8));
        assert_eq!(config.delay_for_attempt(20), Duration::from_secs(60));
        assert_eq!(config.delay_for_attempt(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn test_reconnect_attempt_limit() {
        let config = ReconnectConfig {
            max_attempts: Some(3),
            ..ReconnectConfig::default()
        };
        assert!(config.should_reconnect(2));
        assert!(!config.should_reconnect(3));
        assert!(ReconnectConfig::default().should_reconnect(1000));
    }

    // ==================== File Tests ====================

    #[test]
    fn test_from_toml() {
        let config = WorkerConfig::from_toml(
            r#"
            scheduler_url = "ws://sched:8080"
            node_id = "onprem-1"
            zone = "eu-west"
            cpu_cores = 16.0
            on_premise = true
            idle_opportunity_usd_per_hour = 0.05
            runtime = "podman"
            "#,
        )
        .unwrap();
        assert_eq!(config.scheduler_url, "ws://sched:8080");
        assert_eq!(config.node_id.as_deref(), Some("onprem-1"));
        assert_eq!(config.cpu_cores, Some(16.0));
        assert!(config.on_premise);
        assert_eq!(config.runtime, ContainerRuntime::Podman);
        assert_eq!(config.output_tail_lines, DEFAULT_OUTPUT_TAIL_LINES);
    }

    #[test]
    fn test_from_toml_rejects_unknown_fields() {
        assert!(WorkerConfig::from_toml("gpus = 2").is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "price_per_hour_usd = 0.4").unwrap();
        let config = WorkerConfig::from_file(file.path()).unwrap();
        assert!((config.price_per_hour_usd - 0.4).abs() < f64::EPSILON);
    }

    #[test]
    fn test_from_missing_file() {
        assert!(matches!(
            WorkerConfig::from_file("/nonexistent/worker.toml"),
            Err(WorkerError::Config(_))
        ));
    }

    // ==================== Flag Tests ====================

    #[test]
    fn test_flags_override_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "zone = \"us-east\"\nprice_per_hour_usd = 0.4").unwrap();
        let args = WorkerArgs::parse_from([
            "tgp-worker",
            "--config",
            file.path().to_str().unwrap(),
            "--price",
            "0.9",
            "--on-premise",
            "0.02",
        ]);
        let config = WorkerConfig::from_args(&args).unwrap();
        assert_eq!(config.zone, "us-east");
        assert!((config.price_per_hour_usd - 0.9).abs() < f64::EPSILON);
        assert!(config.on_premise);
        assert!((config.idle_opportunity_usd_per_hour - 0.02).abs() < f64::EPSILON);
    }

    #[test]
    fn test_runtime_binary() {
        assert_eq!(ContainerRuntime::Docker.binary(), "docker");
        assert_eq!(ContainerRuntime::Podman.binary(), "podman");
    }

    // ==================== Validation Tests ====================

    #[test]
    fn test_default_is_valid() {
        assert!(WorkerConfig::default().validate().is_ok());
    }

    #[test_case(WorkerConfig { scheduler_url: "http://x".into(), ..WorkerConfig::default() }; "http url")]
    #[test_case(WorkerConfig { zone: String::new(), ..WorkerConfig::default() }; "empty zone")]
    #[test_case(WorkerConfig { price_per_hour_usd: -1.0, ..WorkerConfig::default() }; "negative price")]
    #[test_case(WorkerConfig { cpu_cores: Some(0.0), ..WorkerConfig::default() }; "zero cpu")]
    #[test_case(WorkerConfig { output_tail_lines: 0, ..WorkerConfig::default() }; "zero tail")]
    fn test_invalid_config(config: WorkerConfig) {
        assert!(matches!(config.validate(), Err(WorkerError::Config(_))));
    }
}
