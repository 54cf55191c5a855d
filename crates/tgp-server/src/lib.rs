//! # tgp-server
//!
//! WebSocket daemon for the TGP economic scheduler.
//!
//! Workers connect to register capacity, heartbeat and report job results.
//! Clients (the `tgp` CLI) connect to submit jobs and query state. Both
//! speak JSON text frames; the first frame decides which protocol applies.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐                    ┌──────────────────────┐
//! │  tgp-worker  │◄──── WebSocket ───►│   SchedulerServer    │
//! └──────────────┘                    │  ┌────────────────┐  │
//!                                     │  │ WorkerSessions │  │
//! ┌──────────────┐                    │  └───────┬────────┘  │
//! │     tgp      │◄──── WebSocket ───►│  ┌───────▼────────┐  │
//! │    (CLI)     │                    │  │SchedulerService│  │
//! └──────────────┘                    │  └────────────────┘  │
//!                                     │  ┌────────────────┐  │
//!                                     │  │LivenessMonitor │  │
//!                                     │  └────────────────┘  │
//!                                     └──────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use tgp_server::{SchedulerServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ServerConfig::default().with_max_connections(1000);
//!     let mut server = SchedulerServer::new(config);
//!     server.serve().await.unwrap();
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client_handler;
pub mod config;
pub mod error;
pub mod server;
pub mod session;

pub use client_handler::{error_response, handle_client_connection, handle_request};
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use server::SchedulerServer;
pub use session::{SessionExecutor, WorkerSession, WorkerSessions};
