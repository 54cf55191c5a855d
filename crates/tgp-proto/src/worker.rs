//! Worker protocol: messages between `tgp-worker` agents and the scheduler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProtoError;
use crate::job::{ExecutorReport, JobSpec};
use crate::node::NodeSpec;
use crate::types::{JobId, JobKind, NodeId, Resources};

/// Protocol version for worker communication.
pub const WORKER_PROTOCOL_VERSION: u32 = 1;

/// Messages sent from a worker to the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    /// Register (or re-register) the node.
    Register {
        /// What the node declares about itself.
        spec: NodeSpec,
        /// Protocol version.
        protocol_version: u32,
    },
    /// Periodic liveness signal.
    Heartbeat {
        /// Node id.
        node_id: NodeId,
        /// Capacity the worker itself sees as free.
        free: Resources,
        /// Worker clock at send time.
        timestamp: DateTime<Utc>,
    },
    /// Executor progress for a job.
    JobUpdate {
        /// Reporting node.
        node_id: NodeId,
        /// Job id.
        job_id: JobId,
        /// What happened.
        report: ExecutorReport,
    },
}

impl WorkerMessage {
    /// Create a register message.
    #[must_use]
    pub const fn register(spec: NodeSpec) -> Self {
        Self::Register {
            spec,
            protocol_version: WORKER_PROTOCOL_VERSION,
        }
    }

    /// Create a heartbeat message.
    #[must_use]
    pub fn heartbeat(node_id: NodeId, free: Resources) -> Self {
        Self::Heartbeat {
            node_id,
            free,
            timestamp: Utc::now(),
        }
    }

    /// Create a job update message.
    #[must_use]
    pub const fn job_update(node_id: NodeId, job_id: JobId, report: ExecutorReport) -> Self {
        Self::JobUpdate {
            node_id,
            job_id,
            report,
        }
    }

    /// Serialize to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, ProtoError> {
        serde_json::to_string(self).map_err(|e| ProtoError::Encoding(e.to_string()))
    }

    /// Deserialize from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if deserialization fails.
    pub fn from_json(json: &str) -> Result<Self, ProtoError> {
        serde_json::from_str(json).map_err(|e| ProtoError::Decoding(e.to_string()))
    }
}

/// Everything an executor needs to start a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchOrder {
    /// Job id.
    pub job_id: JobId,
    /// Kind of workload.
    pub kind: JobKind,
    /// Container image.
    pub image: String,
    /// Command override.
    pub command: Vec<String>,
    /// Limits the container must be started with.
    pub limits: Resources,
}

impl From<&JobSpec> for DispatchOrder {
    fn from(spec: &JobSpec) -> Self {
        Self {
            job_id: spec.id.clone(),
            kind: spec.kind,
            image: spec.image.clone(),
            command: spec.command.clone(),
            limits: spec.resources,
        }
    }
}

/// Messages sent from the scheduler to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SchedulerMessage {
    /// Registration accepted.
    Registered {
        /// The registered node id.
        node_id: NodeId,
        /// How often the worker should heartbeat.
        heartbeat_interval_secs: u64,
    },
    /// Heartbeat accepted.
    HeartbeatAck {
        /// Scheduler clock.
        timestamp: DateTime<Utc>,
    },
    /// Start a job.
    RunJob {
        /// The job to start.
        order: DispatchOrder,
    },
    /// Stop a job; its result is no longer wanted.
    CancelJob {
        /// Job id.
        job_id: JobId,
        /// Why.
        reason: String,
    },
    /// A request from the worker was rejected.
    Error {
        /// Machine-readable code.
        code: u32,
        /// Description.
        message: String,
        /// The worker must register again before anything else is accepted.
        reregister: bool,
    },
}

/// Error codes carried by [`SchedulerMessage::Error`].
pub mod error_codes {
    /// Heartbeat or report from a node that never registered.
    pub const UNKNOWN_NODE: u32 = 2001;
    /// Heartbeat from an evicted node.
    pub const NODE_EVICTED: u32 = 2002;
    /// Registration rejected.
    pub const INVALID_SPEC: u32 = 2003;
    /// Message sent before registering.
    pub const NOT_REGISTERED: u32 = 2004;
    /// Protocol version mismatch.
    pub const PROTOCOL_MISMATCH: u32 = 2005;
}

impl SchedulerMessage {
    /// Create an error message.
    #[must_use]
    pub fn error(code: u32, message: impl Into<String>, reregister: bool) -> Self {
        Self::Error {
            code,
            message: message.into(),
            reregister,
        }
    }

    /// Serialize to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, ProtoError> {
        serde_json::to_string(self).map_err(|e| ProtoError::Encoding(e.to_string()))
    }

    /// Deserialize from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if deserialization fails.
    pub fn from_json(json: &str) -> Result<Self, ProtoError> {
        serde_json::from_str(json).map_err(|e| ProtoError::Decoding(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_carries_version() {
        let spec = NodeSpec::new(NodeId::new("vps-1"), Resources::new(2000, 4096, 0), 0.1);
        let msg = WorkerMessage::register(spec);
        let json = msg.to_json().unwrap();

        assert!(json.contains(r#""type":"register""#));
        assert!(json.contains(r#""protocol_version":1"#));
        assert_eq!(WorkerMessage::from_json(&json).unwrap(), msg);
    }

    #[test]
    fn test_job_update_shape() {
        let msg = WorkerMessage::job_update(
            NodeId::new("vps-1"),
            JobId::new("j1"),
            ExecutorReport::Failed {
                exit_code: Some(1),
                error: "exit status 1".into(),
                output: "boom".into(),
            },
        );
        let json = msg.to_json().unwrap();
        assert!(json.contains(r#""type":"job_update""#));
        assert!(json.contains(r#""status":"failed""#));
    }

    #[test]
    fn test_client_hello_is_not_a_worker_message() {
        assert!(WorkerMessage::from_json(r#"{"type":"hello","version":"x","protocol_version":1}"#).is_err());
    }

    #[test]
    fn test_dispatch_order_from_spec() {
        let spec = JobSpec::new(JobId::new("j1"), Resources::new(500, 256, 0))
            .with_image("busybox:1.36")
            .with_command(vec!["echo".into(), "hi".into()]);
        let order = DispatchOrder::from(&spec);

        assert_eq!(order.job_id, spec.id);
        assert_eq!(order.image, "busybox:1.36");
        assert_eq!(order.limits, spec.resources);
    }

    #[test]
    fn test_error_reregister_flag() {
        let msg = SchedulerMessage::error(error_codes::NODE_EVICTED, "node evicted", true);
        let parsed = SchedulerMessage::from_json(&msg.to_json().unwrap()).unwrap();
        assert_eq!(parsed, msg);
    }
}
