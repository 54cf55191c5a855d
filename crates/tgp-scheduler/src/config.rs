//! Scheduler tuning.

use std::time::Duration;

use crate::latency::LatencyConfig;
use crate::optimizer::PricingPolicy;

/// Default number of placement passes per submission.
pub const DEFAULT_MAX_PLACEMENT_ATTEMPTS: u32 = 3;
/// Default number of requeues after node loss.
pub const DEFAULT_MAX_REQUEUES: u32 = 1;
/// Default heartbeat age after which a node is evicted.
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(90);
/// Default heartbeat age after which a node is suspected.
pub const DEFAULT_SUSPECT_AFTER: Duration = Duration::from_secs(30);
/// Default window for an executor to report a result.
pub const DEFAULT_RESULT_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);
/// Default liveness check period.
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(5);

/// Scheduler configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// Placement passes per submission before giving up on reservation races.
    pub max_placement_attempts: u32,
    /// Requeues allowed after a job loses its node.
    pub max_requeues: u32,
    /// Heartbeat age after which a node is evicted.
    pub heartbeat_timeout: Duration,
    /// Heartbeat age after which a node stops receiving new work.
    pub suspect_after: Duration,
    /// Time a scheduled job may go without a final report.
    pub result_timeout: Duration,
    /// How often the liveness monitor runs.
    pub monitor_interval: Duration,
    /// Cluster pricing.
    pub pricing: PricingPolicy,
    /// Latency model parameters.
    pub latency: LatencyConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_placement_attempts: DEFAULT_MAX_PLACEMENT_ATTEMPTS,
            max_requeues: DEFAULT_MAX_REQUEUES,
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT,
            suspect_after: DEFAULT_SUSPECT_AFTER,
            result_timeout: DEFAULT_RESULT_TIMEOUT,
            monitor_interval: DEFAULT_MONITOR_INTERVAL,
            pricing: PricingPolicy::default(),
            latency: LatencyConfig::default(),
        }
    }
}

impl SchedulerConfig {
    /// Set the placement attempt bound.
    #[must_use]
    pub const fn with_max_placement_attempts(mut self, attempts: u32) -> Self {
        self.max_placement_attempts = attempts;
        self
    }

    /// Set the requeue bound.
    #[must_use]
    pub const fn with_max_requeues(mut self, requeues: u32) -> Self {
        self.max_requeues = requeues;
        self
    }

    /// Set the eviction timeout.
    #[must_use]
    pub const fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }

    /// Set the suspicion threshold.
    #[must_use]
    pub const fn with_suspect_after(mut self, after: Duration) -> Self {
        self.suspect_after = after;
        self
    }

    /// Set the result timeout.
    #[must_use]
    pub const fn with_result_timeout(mut self, timeout: Duration) -> Self {
        self.result_timeout = timeout;
        self
    }

    /// Set the monitor period.
    #[must_use]
    pub const fn with_monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval = interval;
        self
    }

    /// Set the pricing policy.
    #[must_use]
    pub const fn with_pricing(mut self, pricing: PricingPolicy) -> Self {
        self.pricing = pricing;
        self
    }

    /// Set the latency model parameters.
    #[must_use]
    pub fn with_latency(mut self, latency: LatencyConfig) -> Self {
        self.latency = latency;
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns a description of the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_placement_attempts == 0 {
            return Err("max_placement_attempts must be at least 1".to_string());
        }
        if self.heartbeat_timeout.is_zero() {
            return Err("heartbeat_timeout must be positive".to_string());
        }
        if self.suspect_after > self.heartbeat_timeout {
            return Err(format!(
                "suspect_after ({:?}) must not exceed heartbeat_timeout ({:?})",
                self.suspect_after, self.heartbeat_timeout
            ));
        }
        if self.result_timeout.is_zero() {
            return Err("result_timeout must be positive".to_string());
        }
        if self.monitor_interval.is_zero() {
            return Err("monitor_interval must be positive".to_string());
        }
        self.pricing.validate().map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SchedulerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_placement_attempts, 3);
        assert_eq!(config.max_requeues, 1);
        assert_eq!(config.heartbeat_timeout, Duration::from_secs(90));
    }

    #[test]
    fn test_builders() {
        let config = SchedulerConfig::default()
            .with_max_placement_attempts(5)
            .with_max_requeues(0)
            .with_heartbeat_timeout(Duration::from_secs(10))
            .with_suspect_after(Duration::from_secs(4));
        assert_eq!(config.max_placement_attempts, 5);
        assert_eq!(config.max_requeues, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_attempts_invalid() {
        let config = SchedulerConfig::default().with_max_placement_attempts(0);
        assert!(config.validate().unwrap_err().contains("max_placement_attempts"));
    }

    #[test]
    fn test_suspect_after_must_not_exceed_timeout() {
        let config = SchedulerConfig::default()
            .with_heartbeat_timeout(Duration::from_secs(10))
            .with_suspect_after(Duration::from_secs(20));
        assert!(config.validate().unwrap_err().contains("suspect_after"));
    }

    #[test]
    fn test_negative_utilization_invalid() {
        let config = SchedulerConfig::default().with_pricing(PricingPolicy {
            utilization_factor: f64::NAN,
        });
        assert!(config.validate().is_err());
    }
}
