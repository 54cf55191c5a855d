//! Core identifiers and value types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ProtoError;
use crate::validation::{validate_identifier, MAX_CPU_MILLIS, MAX_GPU_COUNT, MAX_MEMORY_MIB};

/// Identifier of a cluster node.
///
/// Node ids are chosen by the operator (usually the hostname) and ordered
/// lexicographically, which makes placement tie-breaks reproducible.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Create a node id without validation.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Parse and validate a node id.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is empty, too long, or has invalid characters.
    pub fn parse(s: &str) -> Result<Self, ProtoError> {
        validate_identifier("node_id", s)?;
        Ok(Self(s.to_string()))
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for NodeId {
    type Err = ProtoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a submitted job.
///
/// An empty id on submission asks the scheduler to generate one.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Create a job id without validation.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random job id.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("job-{}", Uuid::new_v4().simple()))
    }

    /// Parse and validate a job id.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is empty, too long, or has invalid characters.
    pub fn parse(s: &str) -> Result<Self, ProtoError> {
        validate_identifier("job_id", s)?;
        Ok(Self(s.to_string()))
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the id is empty (the client asked for a generated one).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromStr for JobId {
    type Err = ProtoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A quantity of compute resources in integer units.
///
/// Capacity accounting is exact: CPU is tracked in millicores and memory in
/// MiB so repeated reserve/release cycles never drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Resources {
    /// CPU in millicores (1000 = one core).
    pub cpu_millis: u64,
    /// Memory in MiB.
    pub memory_mib: u64,
    /// Whole GPUs.
    #[serde(default)]
    pub gpu_count: u32,
}

impl Resources {
    /// No resources.
    pub const ZERO: Self = Self {
        cpu_millis: 0,
        memory_mib: 0,
        gpu_count: 0,
    };

    /// Create a resource quantity from integer units.
    #[must_use]
    pub const fn new(cpu_millis: u64, memory_mib: u64, gpu_count: u32) -> Self {
        Self {
            cpu_millis,
            memory_mib,
            gpu_count,
        }
    }

    /// Convert from user-facing units (fractional cores and GB).
    ///
    /// # Errors
    ///
    /// Returns an error if a value is negative, non-finite, or beyond the
    /// supported maximum.
    pub fn from_units(cpu_cores: f64, memory_gb: f64, gpu_count: u32) -> Result<Self, ProtoError> {
        let cpu_millis = to_integer_units("cpu_cores", cpu_cores, 1000.0, MAX_CPU_MILLIS)?;
        let memory_mib = to_integer_units("memory_gb", memory_gb, 1024.0, MAX_MEMORY_MIB)?;
        if gpu_count > MAX_GPU_COUNT {
            return Err(ProtoError::Validation(format!(
                "gpu_count: cannot exceed {MAX_GPU_COUNT}"
            )));
        }
        Ok(Self::new(cpu_millis, memory_mib, gpu_count))
    }

    /// CPU in cores.
    #[must_use]
    pub fn cpu_cores(&self) -> f64 {
        self.cpu_millis as f64 / 1000.0
    }

    /// Memory in GB.
    #[must_use]
    pub fn memory_gb(&self) -> f64 {
        self.memory_mib as f64 / 1024.0
    }

    /// Whether every dimension is zero.
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.cpu_millis == 0 && self.memory_mib == 0 && self.gpu_count == 0
    }

    /// Whether `self` fits inside `available` in every dimension.
    #[must_use]
    pub const fn fits_within(&self, available: &Self) -> bool {
        self.cpu_millis <= available.cpu_millis
            && self.memory_mib <= available.memory_mib
            && self.gpu_count <= available.gpu_count
    }

    /// Component-wise sum, or `None` on overflow.
    #[must_use]
    pub fn checked_add(&self, other: &Self) -> Option<Self> {
        Some(Self {
            cpu_millis: self.cpu_millis.checked_add(other.cpu_millis)?,
            memory_mib: self.memory_mib.checked_add(other.memory_mib)?,
            gpu_count: self.gpu_count.checked_add(other.gpu_count)?,
        })
    }

    /// Component-wise difference, or `None` if any dimension would go negative.
    #[must_use]
    pub fn checked_sub(&self, other: &Self) -> Option<Self> {
        Some(Self {
            cpu_millis: self.cpu_millis.checked_sub(other.cpu_millis)?,
            memory_mib: self.memory_mib.checked_sub(other.memory_mib)?,
            gpu_count: self.gpu_count.checked_sub(other.gpu_count)?,
        })
    }

    /// Component-wise difference clamped at zero.
    #[must_use]
    pub const fn saturating_sub(&self, other: &Self) -> Self {
        Self {
            cpu_millis: self.cpu_millis.saturating_sub(other.cpu_millis),
            memory_mib: self.memory_mib.saturating_sub(other.memory_mib),
            gpu_count: self.gpu_count.saturating_sub(other.gpu_count),
        }
    }
}

impl fmt::Display for Resources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} cpu, {:.2} GB", self.cpu_cores(), self.memory_gb())?;
        if self.gpu_count > 0 {
            write!(f, ", {} gpu", self.gpu_count)?;
        }
        Ok(())
    }
}

fn to_integer_units(field: &str, value: f64, scale: f64, max: u64) -> Result<u64, ProtoError> {
    if !value.is_finite() || value < 0.0 {
        return Err(ProtoError::Validation(format!(
            "{field}: must be a non-negative finite number, got {value}"
        )));
    }
    let units = (value * scale).round();
    if units > max as f64 {
        return Err(ProtoError::Validation(format!(
            "{field}: {value} exceeds the supported maximum"
        )));
    }
    Ok(units as u64)
}

/// Liveness of a node as seen by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Heartbeating normally; eligible for placement.
    Active,
    /// Heartbeat is late; kept but not offered new jobs.
    Suspected,
    /// Heartbeat timed out; reservations revoked until it registers again.
    Evicted,
}

impl NodeStatus {
    /// Whether new jobs may be placed on the node.
    #[must_use]
    pub const fn is_schedulable(&self) -> bool {
        matches!(self, Self::Active)
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Suspected => "suspected",
            Self::Evicted => "evicted",
        };
        write!(f, "{s}")
    }
}

/// Lifecycle state of a job.
///
/// ```text
/// Pending ──► Scheduled ──► Running ──► Completed
///    ▲  │         │  │         │  │
///    │  └─────────┼──┴─────────┼──┴──► Failed
///    └────────────┴────────────┘
///          (node evicted, requeue)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Accepted, waiting for a placement pass.
    Pending,
    /// Capacity reserved on a node and handed to its executor.
    Scheduled,
    /// The executor reported that the job started.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished unsuccessfully or could not be placed.
    Failed,
}

impl JobState {
    /// Check if this is a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether the job currently holds a node reservation.
    #[must_use]
    pub const fn holds_reservation(&self) -> bool {
        matches!(self, Self::Scheduled | Self::Running)
    }

    /// Whether the state machine permits moving to `next`.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (*self, next),
            (Self::Pending, Self::Scheduled | Self::Failed)
                | (Self::Scheduled, Self::Running | Self::Pending | Self::Failed)
                | (Self::Running, Self::Completed | Self::Failed | Self::Pending)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Scheduled => "scheduled",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Kind of workload, forwarded to the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Model training.
    Training,
    /// Model serving or batch inference.
    Inference,
    /// ETL and other data processing.
    DataProcessing,
    /// Anything else.
    #[default]
    Batch,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Training => "training",
            Self::Inference => "inference",
            Self::DataProcessing => "data_processing",
            Self::Batch => "batch",
        };
        write!(f, "{s}")
    }
}

impl FromStr for JobKind {
    type Err = ProtoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "training" => Ok(Self::Training),
            "inference" => Ok(Self::Inference),
            "data_processing" | "data-processing" => Ok(Self::DataProcessing),
            "batch" => Ok(Self::Batch),
            other => Err(ProtoError::Validation(format!("unknown job kind: {other}"))),
        }
    }
}
