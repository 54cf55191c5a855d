//! # tgp-proto
//!
//! Shared value types and wire messages for the TGP economic scheduler.
//!
//! Messages are JSON objects tagged with a `type` field and travel as
//! WebSocket text frames:
//!
//! ```text
//! ┌──────────┐  ClientMessage   ┌─────────────┐  SchedulerMessage  ┌────────────┐
//! │   tgp    │─────────────────►│             │───────────────────►│ tgp-worker │
//! │  (CLI)   │◄─────────────────│  tgp-server │◄───────────────────│            │
//! └──────────┘  ClientResponse  └─────────────┘   WorkerMessage    └────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod error;
pub mod job;
pub mod node;
pub mod types;
pub mod validation;
pub mod worker;

pub use client::{ClientMessage, ClientResponse, CLIENT_PROTOCOL_VERSION};
pub use error::ProtoError;
pub use job::{
    Assignment, ExecutorReport, FailureReason, InfeasibleReason, JobSpec, JobStatus,
    PlacementOutcome, Sla,
};
pub use node::{ClusterSummary, NodeInfo, NodeSpec};
pub use types::{JobId, JobKind, JobState, NodeId, NodeStatus, Resources};
pub use worker::{DispatchOrder, SchedulerMessage, WorkerMessage, WORKER_PROTOCOL_VERSION};

// Cost values travel on the wire unchanged.
pub use tgp_cost::CostBreakdown;
