//! Command-line argument parsing with clap.

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use tgp_proto::{JobKind, JobState};

/// Default scheduler URL.
pub const DEFAULT_SCHEDULER_URL: &str = "ws://127.0.0.1:8080";

/// TGP economic scheduler client.
#[derive(Parser, Debug, Clone)]
#[command(name = "tgp")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Scheduler URL to connect to.
    #[arg(short, long, env = "TGP_SCHEDULER_URL", default_value = DEFAULT_SCHEDULER_URL)]
    pub scheduler: String,

    /// Output format.
    #[arg(short, long, value_enum, default_value_t = Format::Table)]
    pub format: Format,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Format {
    /// Human-readable table format.
    #[default]
    Table,
    /// JSON output for scripting.
    Json,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Submit a job for placement.
    SubmitJob(SubmitArgs),

    /// Show a job's status.
    GetStatus {
        /// Job id.
        job_id: String,
    },

    /// Show the cost breakdown of a placed job.
    GetCost {
        /// Job id.
        job_id: String,
    },

    /// Show cluster-wide node and job counters.
    ClusterStatus,

    /// List registered nodes.
    ListNodes,

    /// List jobs.
    ListJobs {
        /// Only show jobs in this state.
        #[arg(long, value_enum)]
        state: Option<StateArg>,
    },
}

/// Arguments for `submit-job`.
#[derive(Parser, Debug, Clone)]
pub struct SubmitArgs {
    /// Job id; generated by the scheduler when omitted.
    #[arg(long)]
    pub job_id: Option<String>,

    /// CPU cores.
    #[arg(long, default_value_t = 1.0)]
    pub cpu: f64,

    /// Memory in GB.
    #[arg(long, default_value_t = 1.0)]
    pub memory: f64,

    /// Whole GPUs.
    #[arg(long, default_value_t = 0)]
    pub gpu: u32,

    /// Maximum acceptable total cost in USD.
    #[arg(long)]
    pub budget: Option<f64>,

    /// Maximum acceptable latency in milliseconds.
    #[arg(long)]
    pub latency: Option<u64>,

    /// Deadline (RFC 3339) by which the job must finish.
    #[arg(long)]
    pub deadline: Option<DateTime<Utc>>,

    /// Estimated run time in hours.
    #[arg(long, default_value_t = 1.0)]
    pub duration: f64,

    /// Estimated data to move, in GB.
    #[arg(long, default_value_t = 0.0)]
    pub data_gb: f64,

    /// Container image.
    #[arg(long)]
    pub image: Option<String>,

    /// Workload kind.
    #[arg(long, value_enum, default_value_t = KindArg::Batch)]
    pub kind: KindArg,

    /// Command to run in the container.
    #[arg(last = true)]
    pub command: Vec<String>,
}

/// Workload kind argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    /// Model training.
    Training,
    /// Inference.
    Inference,
    /// Data processing.
    DataProcessing,
    /// Generic batch work.
    Batch,
}

impl From<KindArg> for JobKind {
    fn from(arg: KindArg) -> Self {
        match arg {
            KindArg::Training => Self::Training,
            KindArg::Inference => Self::Inference,
            KindArg::DataProcessing => Self::DataProcessing,
            KindArg::Batch => Self::Batch,
        }
    }
}

/// Job state filter argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StateArg {
    /// Waiting for placement.
    Pending,
    /// Placed, not started.
    Scheduled,
    /// Running.
    Running,
    /// Finished successfully.
    Completed,
    /// Failed.
    Failed,
}

impl From<StateArg> for JobState {
    fn from(arg: StateArg) -> Self {
        match arg {
            StateArg::Pending => Self::Pending,
            StateArg::Scheduled => Self::Scheduled,
            StateArg::Running => Self::Running,
            StateArg::Completed => Self::Completed,
            StateArg::Failed => Self::Failed,
        }
    }
}
