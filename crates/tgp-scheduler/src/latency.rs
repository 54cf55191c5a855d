//! Latency estimation used by the SLA filter.
//!
//! The estimate is a policy, not a measurement: [`LatencyModel`] is the seam
//! for replacing it. [`LoadAwareLatency`] is the default:
//!
//! ```text
//! latency_ms = base_ms
//!            + round(load_penalty_ms * utilization_after_placement)
//!            + (remote_zone_penalty_ms if node.zone != home_zone)
//! ```
//!
//! `utilization_after_placement` is the highest ratio of reserved to total
//! capacity over the CPU, memory and GPU dimensions, counting the job itself.

use std::fmt;

use serde::{Deserialize, Serialize};
use tgp_proto::{JobSpec, Resources};

use crate::registry::Node;

/// Estimates the latency a job would see on a node.
pub trait LatencyModel: Send + Sync + fmt::Debug {
    /// Estimated latency in milliseconds if `job` were placed on `node`.
    fn estimate_ms(&self, job: &JobSpec, node: &Node) -> u64;
}

/// Parameters of [`LoadAwareLatency`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LatencyConfig {
    /// Baseline service latency.
    pub base_ms: u64,
    /// Added in proportion to node utilization after placement.
    pub load_penalty_ms: u64,
    /// Added for nodes outside the home zone.
    pub remote_zone_penalty_ms: u64,
    /// Zone the scheduler considers local; `None` treats every zone as local.
    pub home_zone: Option<String>,
}

impl Default for LatencyConfig {
    fn default() -> Self {
        Self {
            base_ms: 50,
            load_penalty_ms: 100,
            remote_zone_penalty_ms: 0,
            home_zone: None,
        }
    }
}

/// Default latency model: baseline plus load and locality penalties.
#[derive(Debug, Clone, Default)]
pub struct LoadAwareLatency {
    config: LatencyConfig,
}

impl LoadAwareLatency {
    /// Create a model from its parameters.
    #[must_use]
    pub const fn new(config: LatencyConfig) -> Self {
        Self { config }
    }

    /// The model parameters.
    #[must_use]
    pub const fn config(&self) -> &LatencyConfig {
        &self.config
    }
}

impl LatencyModel for LoadAwareLatency {
    fn estimate_ms(&self, job: &JobSpec, node: &Node) -> u64 {
        let utilization = utilization_after(&node.reserved, &job.resources, &node.spec.capacity);
        let load = (self.config.load_penalty_ms as f64 * utilization).round() as u64;

        let remote = match &self.config.home_zone {
            Some(home) if *home != node.spec.zone => self.config.remote_zone_penalty_ms,
            _ => 0,
        };

        self.config
            .base_ms
            .saturating_add(load)
            .saturating_add(remote)
    }
}

/// Highest per-dimension utilization once `request` is added to `reserved`,
/// clamped to `[0, 1]`. Dimensions with zero capacity are ignored.
#[must_use]
pub fn utilization_after(reserved: &Resources, request: &Resources, capacity: &Resources) -> f64 {
    let ratio = |used: u64, total: u64| {
        if total == 0 {
            0.0
        } else {
            used as f64 / total as f64
        }
    };

    let cpu = ratio(reserved.cpu_millis + request.cpu_millis, capacity.cpu_millis);
    let mem = ratio(reserved.memory_mib + request.memory_mib, capacity.memory_mib);
    let gpu = ratio(
        u64::from(reserved.gpu_count) + u64::from(request.gpu_count),
        u64::from(capacity.gpu_count),
    );

    cpu.max(mem).max(gpu).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tgp_proto::{JobId, NodeId, NodeSpec};

    fn node(zone: &str, reserved: Resources) -> Node {
        let spec = NodeSpec::new(NodeId::new("n1"), Resources::new(4000, 8192, 0), 0.1)
            .with_zone(zone);
        let mut node = Node::new(spec, Utc::now());
        node.reserved = reserved;
        node
    }

    fn job(cpu_millis: u64, memory_mib: u64) -> JobSpec {
        JobSpec::new(JobId::new("j"), Resources::new(cpu_millis, memory_mib, 0))
    }

    #[test]
    fn test_idle_node_latency() {
        let model = LoadAwareLatency::default();
        // 1 of 4 cores -> 25% utilization -> 25ms penalty.
        assert_eq!(model.estimate_ms(&job(1000, 1024), &node("default", Resources::ZERO)), 75);
    }

    #[test]
    fn test_full_node_latency() {
        let model = LoadAwareLatency::default();
        let busy = node("default", Resources::new(3000, 0, 0));
        assert_eq!(model.estimate_ms(&job(1000, 1024), &busy), 150);
    }

    #[test]
    fn test_memory_dominates_when_higher() {
        let model = LoadAwareLatency::default();
        assert_eq!(model.estimate_ms(&job(100, 4096), &node("default", Resources::ZERO)), 100);
    }

    #[test]
    fn test_remote_zone_penalty() {
        let model = LoadAwareLatency::new(LatencyConfig {
            base_ms: 50,
            load_penalty_ms: 0,
            remote_zone_penalty_ms: 200,
            home_zone: Some("eu-west".into()),
        });

        assert_eq!(model.estimate_ms(&job(1000, 1024), &node("eu-west", Resources::ZERO)), 50);
        assert_eq!(model.estimate_ms(&job(1000, 1024), &node("us-east", Resources::ZERO)), 250);
    }

    #[test]
    fn test_no_home_zone_means_everything_is_local() {
        let model = LoadAwareLatency::new(LatencyConfig {
            remote_zone_penalty_ms: 500,
            ..LatencyConfig::default()
        });
        assert!(model.estimate_ms(&job(1000, 1024), &node("anywhere", Resources::ZERO)) < 500);
    }

    #[test]
    fn test_utilization_ignores_missing_gpus() {
        let util = utilization_after(
            &Resources::ZERO,
            &Resources::new(2000, 1024, 0),
            &Resources::new(4000, 8192, 0),
        );
        assert_eq!(util, 0.5);
    }

    #[test]
    fn test_utilization_counts_gpus() {
        let util = utilization_after(
            &Resources::ZERO,
            &Resources::new(100, 100, 1),
            &Resources::new(4000, 8192, 1),
        );
        assert_eq!(util, 1.0);
    }
}
