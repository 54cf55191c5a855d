//! # tgp-worker
//!
//! Worker agent for the TGP economic scheduler.
//!
//! A worker registers its node with the scheduler (capacity, price, zone),
//! heartbeats with the capacity its jobs leave free, runs dispatched jobs as
//! containers with enforced CPU and memory limits, and reports `Started`,
//! then `Completed` or `Failed` with the exit status and an output tail.
//!
//! ```text
//! ┌──────────────┐  Register/Heartbeat/JobUpdate  ┌──────────────┐
//! │  tgp-worker  │───────────────────────────────►│  tgp-server  │
//! │              │◄───────────────────────────────│              │
//! └──────┬───────┘   Registered/RunJob/CancelJob  └──────────────┘
//!        │ docker run --cpus --memory
//!        ▼
//!   ┌──────────┐
//!   │container │
//!   └──────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod agent;
pub mod config;
pub mod error;
pub mod executor;
pub mod resources;

pub use agent::{SessionEnd, WorkerAgent};
pub use config::{ContainerRuntime, ReconnectConfig, WorkerArgs, WorkerConfig};
pub use error::{WorkerError, WorkerResult};
pub use executor::{ContainerExecutor, InstantRunner, JobRunner};
pub use resources::{HostInfo, RunningJobs, node_spec};
