//! Node registration specs and cluster views.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProtoError;
use crate::types::{NodeId, NodeStatus, Resources};
use crate::validation::{validate_amount, validate_identifier, ValidationResult};

/// Zone assigned to nodes that do not declare one.
pub const DEFAULT_ZONE: &str = "default";

fn default_zone() -> String {
    DEFAULT_ZONE.to_string()
}

/// What a node declares about itself when it registers.
///
/// Pricing differences between on-premise and cloud machines are plain data;
/// the cost model treats every node the same way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Stable node identity.
    pub id: NodeId,
    /// Hostname, for display.
    #[serde(default)]
    pub hostname: String,
    /// Location or zone tag.
    #[serde(default = "default_zone")]
    pub zone: String,
    /// Total schedulable capacity.
    pub capacity: Resources,
    /// Price in USD per hour.
    pub price_per_hour_usd: f64,
    /// On-premise machines carry an idle-capacity opportunity cost.
    #[serde(default)]
    pub on_premise: bool,
    /// Price of moving data to this node, in USD per GB.
    #[serde(default)]
    pub transfer_price_per_gb_usd: f64,
    /// Opportunity cost of idle capacity, in USD per hour.
    #[serde(default)]
    pub idle_opportunity_usd_per_hour: f64,
}

impl NodeSpec {
    /// Create a cloud node spec in the default zone with free data transfer.
    #[must_use]
    pub fn new(id: NodeId, capacity: Resources, price_per_hour_usd: f64) -> Self {
        Self {
            hostname: id.to_string(),
            id,
            zone: default_zone(),
            capacity,
            price_per_hour_usd,
            on_premise: false,
            transfer_price_per_gb_usd: 0.0,
            idle_opportunity_usd_per_hour: 0.0,
        }
    }

    /// Set the zone.
    #[must_use]
    pub fn with_zone(mut self, zone: impl Into<String>) -> Self {
        self.zone = zone.into();
        self
    }

    /// Set the hostname.
    #[must_use]
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }

    /// Mark as on-premise with the given idle opportunity cost.
    #[must_use]
    pub fn on_premise(mut self, idle_opportunity_usd_per_hour: f64) -> Self {
        self.on_premise = true;
        self.idle_opportunity_usd_per_hour = idle_opportunity_usd_per_hour;
        self
    }

    /// Set the transfer price.
    #[must_use]
    pub fn with_transfer_price(mut self, usd_per_gb: f64) -> Self {
        self.transfer_price_per_gb_usd = usd_per_gb;
        self
    }

    /// Validate identity, capacity, and pricing.
    ///
    /// # Errors
    ///
    /// Returns [`ProtoError::Validation`] listing every invalid field.
    pub fn validate(&self) -> Result<(), ProtoError> {
        let mut result = ValidationResult::new();

        result.check(validate_identifier("node_id", self.id.as_str()));
        if self.zone.is_empty() {
            result.error("zone", "cannot be empty");
        }
        if self.capacity.cpu_millis == 0 {
            result.error("capacity.cpu_millis", "must be greater than 0");
        }
        if self.capacity.memory_mib == 0 {
            result.error("capacity.memory_mib", "must be greater than 0");
        }
        result.check(validate_amount("price_per_hour_usd", self.price_per_hour_usd));
        result.check(validate_amount(
            "transfer_price_per_gb_usd",
            self.transfer_price_per_gb_usd,
        ));
        result.check(validate_amount(
            "idle_opportunity_usd_per_hour",
            self.idle_opportunity_usd_per_hour,
        ));

        result.into_result()
    }
}

/// A node as listed to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Node id.
    pub id: NodeId,
    /// Hostname.
    pub hostname: String,
    /// Location or zone tag.
    pub location: String,
    /// Total capacity.
    pub capacity: Resources,
    /// Capacity reserved by active assignments.
    pub reserved: Resources,
    /// Price in USD per hour.
    pub cost_per_hour_usd: f64,
    /// On-premise flag.
    pub on_premise: bool,
    /// Liveness.
    pub status: NodeStatus,
    /// Last heartbeat received.
    pub last_heartbeat: DateTime<Utc>,
}

impl NodeInfo {
    /// Capacity not currently reserved.
    #[must_use]
    pub const fn free(&self) -> Resources {
        self.capacity.saturating_sub(&self.reserved)
    }
}

/// Cluster-wide counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClusterSummary {
    /// Nodes ever registered and not forgotten.
    pub total_nodes: usize,
    /// Nodes currently eligible for placement.
    pub active_nodes: usize,
    /// Nodes with a late heartbeat.
    pub suspected_nodes: usize,
    /// Nodes evicted after a heartbeat timeout.
    pub evicted_nodes: usize,
    /// Jobs known to the scheduler.
    pub total_jobs: usize,
    /// Jobs waiting for placement.
    pub pending_jobs: usize,
    /// Jobs placed but not yet started.
    pub scheduled_jobs: usize,
    /// Jobs running.
    pub running_jobs: usize,
    /// Jobs completed successfully.
    pub completed_jobs: usize,
    /// Jobs that failed.
    pub failed_jobs: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn spec() -> NodeSpec {
        NodeSpec::new(NodeId::new("vps-1"), Resources::new(4000, 8192, 0), 0.10)
    }

    #[test]
    fn test_new_defaults() {
        let s = spec();
        assert_eq!(s.hostname, "vps-1");
        assert_eq!(s.zone, DEFAULT_ZONE);
        assert!(!s.on_premise);
        assert_eq!(s.transfer_price_per_gb_usd, 0.0);
        assert_eq!(s.idle_opportunity_usd_per_hour, 0.0);
    }

    #[test]
    fn test_on_premise_builder() {
        let s = spec().on_premise(0.5).with_zone("dc-1").with_transfer_price(0.01);
        assert!(s.on_premise);
        assert_eq!(s.idle_opportunity_usd_per_hour, 0.5);
        assert_eq!(s.zone, "dc-1");
        assert_eq!(s.transfer_price_per_gb_usd, 0.01);
    }

    #[test]
    fn test_validate_ok() {
        assert!(spec().validate().is_ok());
    }

    #[test_case(NodeSpec::new(NodeId::new(""), Resources::new(1000, 1024, 0), 0.1), "node_id" ; "empty id")]
    #[test_case(NodeSpec::new(NodeId::new("n"), Resources::new(0, 1024, 0), 0.1), "cpu" ; "no cpu")]
    #[test_case(NodeSpec::new(NodeId::new("n"), Resources::new(1000, 0, 0), 0.1), "memory" ; "no memory")]
    #[test_case(NodeSpec::new(NodeId::new("n"), Resources::new(1000, 1024, 0), -0.1), "price_per_hour" ; "negative price")]
    #[test_case(spec().with_transfer_price(f64::NAN), "transfer_price" ; "nan transfer")]
    #[test_case(spec().on_premise(f64::INFINITY), "idle_opportunity" ; "infinite idle cost")]
    #[test_case(spec().with_zone(""), "zone" ; "empty zone")]
    fn test_validate_rejects(s: NodeSpec, field: &str) {
        let err = s.validate().unwrap_err().to_string();
        assert!(err.contains(field), "{err} should mention {field}");
    }

    #[test]
    fn test_deserialize_defaults() {
        let json = r#"{
            "id": "n1",
            "capacity": {"cpu_millis": 2000, "memory_mib": 4096},
            "price_per_hour_usd": 0.2
        }"#;
        let s: NodeSpec = serde_json::from_str(json).unwrap();
        assert_eq!(s.zone, DEFAULT_ZONE);
        assert!(s.hostname.is_empty());
        assert!(!s.on_premise);
    }

    #[test]
    fn test_node_info_free() {
        let info = NodeInfo {
            id: NodeId::new("n"),
            hostname: "n".into(),
            location: DEFAULT_ZONE.into(),
            capacity: Resources::new(4000, 8192, 1),
            reserved: Resources::new(1500, 2048, 1),
            cost_per_hour_usd: 0.1,
            on_premise: false,
            status: NodeStatus::Active,
            last_heartbeat: Utc::now(),
        };
        assert_eq!(info.free(), Resources::new(2500, 6144, 0));
    }
}
