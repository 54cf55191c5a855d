//! # tgp-cli
//!
//! Command-line client for the TGP economic scheduler.
//!
//! The `tgp` binary connects to `tgp-server` over WebSocket, speaks the
//! client protocol from `tgp-proto` and prints results as tables or JSON.
//!
//! ```text
//! ┌───────────┐    client protocol    ┌──────────────┐
//! │    tgp    │◄─────────────────────►│  tgp-server  │
//! └───────────┘      (WebSocket)      └──────────────┘
//! ```
//!
//! Exit status is `0` on success, `1` on transport or local errors, `2` when
//! the scheduler returns an error and `3` when a submitted job is infeasible.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod client;
pub mod commands;
pub mod error;
pub mod output;

pub use cli::{Cli, Commands, Format, SubmitArgs};
pub use client::SchedulerClient;
pub use error::CliError;
pub use output::OutputFormat;
