//! Job specification, placement results, and job status views.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tgp_cost::CostBreakdown;

use crate::error::ProtoError;
use crate::types::{JobId, JobKind, JobState, NodeId, Resources};
use crate::validation::{validate_amount, validate_identifier, validate_image, ValidationResult};

/// Image used when a submission does not name one.
pub const DEFAULT_IMAGE: &str = "alpine:latest";

/// Latency bound used when a submission does not set one.
pub const DEFAULT_MAX_LATENCY_MS: u64 = 1000;

/// Duration assumed when a submission does not estimate one.
pub const DEFAULT_DURATION_HOURS: f64 = 1.0;

fn default_image() -> String {
    DEFAULT_IMAGE.to_string()
}

const fn default_max_latency_ms() -> u64 {
    DEFAULT_MAX_LATENCY_MS
}

const fn default_duration_hours() -> f64 {
    DEFAULT_DURATION_HOURS
}

/// Service-level constraints a placement must satisfy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sla {
    /// Maximum acceptable estimated latency in milliseconds.
    #[serde(default = "default_max_latency_ms")]
    pub max_latency_ms: u64,
    /// Budget ceiling for the total placement cost in USD.
    #[serde(default)]
    pub budget_usd: Option<f64>,
    /// The job must be able to finish before this instant.
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
}

impl Default for Sla {
    fn default() -> Self {
        Self {
            max_latency_ms: DEFAULT_MAX_LATENCY_MS,
            budget_usd: None,
            deadline: None,
        }
    }
}

/// A job as submitted. Immutable once accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Job id; empty to have one generated.
    #[serde(default)]
    pub id: JobId,
    /// Kind of workload.
    #[serde(default)]
    pub kind: JobKind,
    /// Container image to run.
    #[serde(default = "default_image")]
    pub image: String,
    /// Command override; empty runs the image entrypoint.
    #[serde(default)]
    pub command: Vec<String>,
    /// Requested resources.
    pub resources: Resources,
    /// Service-level constraints.
    #[serde(default)]
    pub sla: Sla,
    /// Estimated run time in hours.
    #[serde(default = "default_duration_hours")]
    pub estimated_duration_hours: f64,
    /// Estimated data moved to the node, in GB.
    #[serde(default)]
    pub estimated_data_gb: f64,
}

impl JobSpec {
    /// Create a spec with default image, SLA, and estimates.
    #[must_use]
    pub fn new(id: JobId, resources: Resources) -> Self {
        Self {
            id,
            kind: JobKind::default(),
            image: default_image(),
            command: Vec::new(),
            resources,
            sla: Sla::default(),
            estimated_duration_hours: DEFAULT_DURATION_HOURS,
            estimated_data_gb: 0.0,
        }
    }

    /// Set the job kind.
    #[must_use]
    pub const fn with_kind(mut self, kind: JobKind) -> Self {
        self.kind = kind;
        self
    }

    /// Set the container image.
    #[must_use]
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    /// Set the command override.
    #[must_use]
    pub fn with_command(mut self, command: Vec<String>) -> Self {
        self.command = command;
        self
    }

    /// Set the latency bound.
    #[must_use]
    pub const fn with_max_latency_ms(mut self, max_latency_ms: u64) -> Self {
        self.sla.max_latency_ms = max_latency_ms;
        self
    }

    /// Set the budget ceiling.
    #[must_use]
    pub const fn with_budget(mut self, budget_usd: f64) -> Self {
        self.sla.budget_usd = Some(budget_usd);
        self
    }

    /// Set the deadline.
    #[must_use]
    pub const fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.sla.deadline = Some(deadline);
        self
    }

    /// Set the estimated duration.
    #[must_use]
    pub const fn with_duration_hours(mut self, hours: f64) -> Self {
        self.estimated_duration_hours = hours;
        self
    }

    /// Set the estimated data volume.
    #[must_use]
    pub const fn with_data_gb(mut self, data_gb: f64) -> Self {
        self.estimated_data_gb = data_gb;
        self
    }

    /// Validate identity, image, resource request, and SLA fields.
    ///
    /// The duration and data estimates are cost inputs and are checked by the
    /// cost model instead.
    ///
    /// # Errors
    ///
    /// Returns [`ProtoError::Validation`] listing every invalid field.
    pub fn validate(&self) -> Result<(), ProtoError> {
        let mut result = ValidationResult::new();

        if !self.id.is_empty() {
            result.check(validate_identifier("job_id", self.id.as_str()));
        }
        result.check(validate_image(&self.image));

        if self.resources.cpu_millis == 0 {
            result.error("resources.cpu_millis", "must request some CPU");
        }
        if self.resources.memory_mib == 0 {
            result.error("resources.memory_mib", "must request some memory");
        }
        if self.sla.max_latency_ms == 0 {
            result.error("sla.max_latency_ms", "must be greater than 0");
        }
        if let Some(budget) = self.sla.budget_usd {
            result.check(validate_amount("sla.budget_usd", budget));
        }

        result.into_result()
    }
}

/// Why a job could not be placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InfeasibleReason {
    /// No active node has enough free capacity.
    NoCapacity,
    /// Nodes with capacity exist but none meets the latency or deadline bound.
    SlaUnreachable,
    /// Every otherwise feasible node costs more than the budget.
    OverBudget,
}

impl fmt::Display for InfeasibleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NoCapacity => "no_capacity",
            Self::SlaUnreachable => "sla_unreachable",
            Self::OverBudget => "over_budget",
        };
        write!(f, "{s}")
    }
}

/// Why a job ended in [`JobState::Failed`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum FailureReason {
    /// No placement existed at submission time.
    Infeasible {
        /// Reason code of the failed placement.
        infeasible: InfeasibleReason,
    },
    /// The node running the job was evicted and the job could not be re-placed.
    NodeLost,
    /// The executor reported a failure.
    Executor {
        /// Exit code, if the container ran.
        exit_code: Option<i32>,
        /// Error reported by the executor.
        message: String,
    },
    /// The executor never reported a result in time.
    ResultTimeout,
    /// The job could not be handed to the node's executor.
    DispatchFailed {
        /// Transport error.
        message: String,
    },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Infeasible { infeasible } => write!(f, "infeasible: {infeasible}"),
            Self::NodeLost => write!(f, "node lost"),
            Self::Executor {
                exit_code: Some(code),
                message,
            } => write!(f, "executor failed (exit {code}): {message}"),
            Self::Executor {
                exit_code: None,
                message,
            } => write!(f, "executor failed: {message}"),
            Self::ResultTimeout => write!(f, "no result reported before timeout"),
            Self::DispatchFailed { message } => write!(f, "dispatch failed: {message}"),
        }
    }
}

/// The binding of a job to a node, with the cost computed at decision time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    /// Node the job was placed on.
    pub node_id: NodeId,
    /// Cost of the placement.
    pub cost: CostBreakdown,
    /// Latency estimate used to check the SLA.
    pub estimated_latency_ms: u64,
    /// When the placement was made.
    pub assigned_at: DateTime<Utc>,
}

/// Result of a placement attempt as reported to the submitter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PlacementOutcome {
    /// The job was placed.
    Scheduled {
        /// The chosen node and its cost.
        assignment: Assignment,
    },
    /// No node satisfied the job.
    Infeasible {
        /// Reason code.
        reason: InfeasibleReason,
        /// Human-readable explanation.
        detail: String,
    },
    /// A node was chosen but the job could not be handed to it. The job is
    /// failed and its reservation freed.
    DispatchFailed {
        /// The node that could not be reached.
        node_id: NodeId,
        /// Delivery error.
        message: String,
    },
}

impl PlacementOutcome {
    /// Whether the job was placed.
    #[must_use]
    pub const fn is_scheduled(&self) -> bool {
        matches!(self, Self::Scheduled { .. })
    }

    /// The assignment, if placed.
    #[must_use]
    pub const fn assignment(&self) -> Option<&Assignment> {
        match self {
            Self::Scheduled { assignment } => Some(assignment),
            Self::Infeasible { .. } | Self::DispatchFailed { .. } => None,
        }
    }
}

/// Progress reported by a node's executor for one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutorReport {
    /// The container started.
    Started,
    /// The container exited with status 0.
    Completed {
        /// Exit status.
        exit_code: i32,
        /// Captured output (tail).
        output: String,
    },
    /// The container failed to start or exited non-zero.
    Failed {
        /// Exit status, if the container ran.
        exit_code: Option<i32>,
        /// Error description.
        error: String,
        /// Captured output (tail).
        output: String,
    },
}

impl ExecutorReport {
    /// Whether the report ends the job.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Started)
    }

    /// The job state this report moves the job into.
    #[must_use]
    pub const fn target_state(&self) -> JobState {
        match self {
            Self::Started => JobState::Running,
            Self::Completed { .. } => JobState::Completed,
            Self::Failed { .. } => JobState::Failed,
        }
    }
}

/// Point-in-time view of a job, returned by status queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    /// Job id.
    pub job_id: JobId,
    /// Current state.
    pub state: JobState,
    /// Kind of workload.
    pub kind: JobKind,
    /// Requested resources.
    pub resources: Resources,
    /// Current (or final) assignment.
    pub assignment: Option<Assignment>,
    /// When the job was submitted.
    pub submitted_at: DateTime<Utc>,
    /// When the executor reported the start.
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal state.
    pub ended_at: Option<DateTime<Utc>>,
    /// Failure reason, if failed.
    pub failure: Option<FailureReason>,
    /// Exit status reported by the executor.
    pub exit_code: Option<i32>,
    /// Captured output tail reported by the executor.
    pub output: Option<String>,
    /// How many times the job was requeued after losing its node.
    pub requeue_count: u32,
}

impl JobStatus {
    /// Node the job is (or was last) assigned to.
    #[must_use]
    pub fn node_id(&self) -> Option<&NodeId> {
        self.assignment.as_ref().map(|a| &a.node_id)
    }

    /// Cost of the current (or final) assignment.
    #[must_use]
    pub fn cost(&self) -> Option<&CostBreakdown> {
        self.assignment.as_ref().map(|a| &a.cost)
    }
}
