//! # tgp-scheduler
//!
//! Economic scheduler core. Jobs are placed on the node with the lowest total
//! cost of ownership that still satisfies their latency, deadline and budget
//! constraints.
//!
//! ```text
//!   submit(job)
//!       │
//!       ▼
//! ┌──────────────────┐ snapshot ┌─────────────────┐
//! │ SchedulerService │◄─────────│ ClusterRegistry │◄── register / heartbeat
//! │   (JobTable)     │─reserve─►│                 │◄── LivenessMonitor
//! └──────────────────┘          └─────────────────┘
//!       │     ▲
//!       │     │ place(job, snapshot)
//!       │  ┌──┴────────┐   ┌────────────┐
//!       │  │ Optimizer │──►│ CostEngine │
//!       │  └───────────┘   └────────────┘
//!       ▼
//!   Executor ──► node ──► report_node_result
//! ```
//!
//! - [`ClusterRegistry`]: nodes, capacity reservations, and liveness
//! - [`Optimizer`]: cheapest feasible node for one job
//! - [`SchedulerService`]: submission, job lifecycle, queries
//! - [`LivenessMonitor`]: periodic suspicion, eviction, and result timeouts

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod executor;
pub mod job;
pub mod latency;
pub mod monitor;
pub mod optimizer;
pub mod registry;
pub mod service;

pub use config::SchedulerConfig;
pub use executor::{Executor, ExecutorCall, ExecutorError, NoOpExecutor, RecordingExecutor};
pub use job::{JobRecord, JobTable, LifecycleError};
pub use latency::{LatencyConfig, LatencyModel, LoadAwareLatency};
pub use monitor::LivenessMonitor;
pub use optimizer::{Infeasible, Optimizer, Placement, PricingPolicy, RejectedNode, Rejection};
pub use registry::{AssignmentToken, ClusterRegistry, ClusterSnapshot, Eviction, Node, RegistryError};
pub use service::{MaintenanceReport, SchedulerError, SchedulerResult, SchedulerService, Submission};
