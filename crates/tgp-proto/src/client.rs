//! Client protocol: messages between the `tgp` CLI and the scheduler.
//!
//! A client connection starts with [`ClientMessage::Hello`]; the scheduler
//! answers with [`ClientResponse::Welcome`] and then replies to each request
//! with exactly one response.
//!
//! ```rust
//! use tgp_proto::client::{ClientMessage, ClientResponse};
//!
//! let request = ClientMessage::ClusterStatus;
//! assert!(request.to_json().unwrap().contains("cluster_status"));
//!
//! let response = ClientResponse::from_json(r#"{"type":"pong","timestamp":7}"#).unwrap();
//! assert_eq!(response, ClientResponse::Pong { timestamp: 7 });
//! ```

use serde::{Deserialize, Serialize};
use tgp_cost::CostBreakdown;

use crate::error::ProtoError;
use crate::job::{JobSpec, JobStatus, PlacementOutcome};
use crate::node::{ClusterSummary, NodeInfo};
use crate::types::{JobId, JobState};

/// Protocol version for client communication.
pub const CLIENT_PROTOCOL_VERSION: u32 = 1;

/// Messages sent from a client to the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Handshake to identify as a client.
    Hello {
        /// Client version.
        version: String,
        /// Protocol version.
        protocol_version: u32,
    },

    /// Submit a job for placement.
    SubmitJob {
        /// The job.
        spec: JobSpec,
    },

    /// Query a job's status.
    GetJobStatus {
        /// Job id.
        job_id: JobId,
    },

    /// Query a job's placement cost.
    GetJobCost {
        /// Job id.
        job_id: JobId,
    },

    /// Cluster-wide counters.
    ClusterStatus,

    /// List registered nodes.
    ListNodes,

    /// List jobs, optionally filtered by state.
    ListJobs {
        /// Only jobs in this state.
        #[serde(default)]
        state_filter: Option<JobState>,
    },

    /// Ping to check connection.
    Ping {
        /// Echoed back in the pong.
        timestamp: u64,
    },
}

impl ClientMessage {
    /// Create a hello message.
    #[must_use]
    pub fn hello(version: impl Into<String>) -> Self {
        Self::Hello {
            version: version.into(),
            protocol_version: CLIENT_PROTOCOL_VERSION,
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

    /// Request type name for logs and error reporting.
    #[must_use]
    pub const fn request_type(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "hello",
            Self::SubmitJob { .. } => "submit_job",
            Self::GetJobStatus { .. } => "get_job_status",
            Self::GetJobCost { .. } => "get_job_cost",
            Self::ClusterStatus => "cluster_status",
            Self::ListNodes => "list_nodes",
            Self::ListJobs { .. } => "list_jobs",
            Self::Ping { .. } => "ping",
        }
    }
}

/// Responses sent from the scheduler to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientResponse {
    /// Handshake accepted.
    Welcome {
        /// Scheduler version.
        server_version: String,
        /// Protocol version.
        protocol_version: u32,
    },

    /// Result of a submission.
    JobSubmitted {
        /// Id of the job (generated if the request left it empty).
        job_id: JobId,
        /// Placement outcome.
        outcome: PlacementOutcome,
    },

    /// A job's status.
    JobStatus {
        /// The status view.
        status: JobStatus,
    },

    /// A job's placement cost.
    JobCost {
        /// Job id.
        job_id: JobId,
        /// Cost breakdown.
        cost: CostBreakdown,
    },

    /// Cluster counters.
    ClusterStatus {
        /// The counters.
        summary: ClusterSummary,
    },

    /// Node listing.
    Nodes {
        /// Nodes ordered by id.
        nodes: Vec<NodeInfo>,
    },

    /// Job listing.
    Jobs {
        /// Jobs ordered by id.
        jobs: Vec<JobStatus>,
    },

    /// Pong.
    Pong {
        /// Echoed timestamp.
        timestamp: u64,
    },

    /// Request failed.
    Error {
        /// One of [`error_codes`].
        code: u32,
        /// Description.
        message: String,
    },
}

/// Error codes carried by [`ClientResponse::Error`].
pub mod error_codes {
    /// Malformed or unexpected request.
    pub const INVALID_REQUEST: u32 = 1001;
    /// Job or node not found.
    pub const NOT_FOUND: u32 = 1002;
    /// Submission failed validation.
    pub const VALIDATION: u32 = 1003;
    /// Internal error.
    pub const INTERNAL: u32 = 1004;
    /// Protocol version mismatch.
    pub const PROTOCOL_MISMATCH: u32 = 1005;
    /// Cost requested before the job was placed.
    pub const COST_UNAVAILABLE: u32 = 1006;
    /// A job with this id already exists.
    pub const DUPLICATE_JOB: u32 = 1007;
}

impl ClientResponse {
    /// Create a welcome response.
    #[must_use]
    pub fn welcome(server_version: impl Into<String>) -> Self {
        Self::Welcome {
            server_version: server_version.into(),
            protocol_version: CLIENT_PROTOCOL_VERSION,
        }
    }

    /// Create an error response.
    #[must_use]
    pub fn error(code: u32, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }

    /// Whether this is an error response.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
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
