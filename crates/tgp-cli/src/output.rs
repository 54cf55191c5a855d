//! Output formatting for CLI commands.
//!
//! Supports table (human-readable) and JSON output formats.

use std::io::Write;

use serde::Serialize;
use tgp_proto::{ClusterSummary, CostBreakdown, JobId, JobStatus, NodeInfo, PlacementOutcome};

use crate::cli::Format;
use crate::error::CliError;

/// Output formatter that handles both table and JSON output.
#[derive(Debug, Clone)]
pub struct OutputFormat {
    format: Format,
}

impl OutputFormat {
    /// Create a new output formatter.
    #[must_use]
    pub const fn new(format: Format) -> Self {
        Self { format }
    }

    /// Check if JSON format is selected.
    #[must_use]
    pub const fn is_json(&self) -> bool {
        matches!(self.format, Format::Json)
    }

    /// Write a value to the output.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn write<W, T>(&self, writer: &mut W, value: &T) -> Result<(), CliError>
    where
        W: Write,
        T: Serialize + TableDisplay + ?Sized,
    {
        match self.format {
            Format::Json => {
                serde_json::to_writer_pretty(&mut *writer, value)
                    .map_err(|e| CliError::Format(format!("JSON serialization failed: {e}")))?;
                writeln!(writer)?;
            }
            Format::Table => value.write_table(writer)?,
        }
        Ok(())
    }

    /// Render a value to a string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_string<T>(&self, value: &T) -> Result<String, CliError>
    where
        T: Serialize + TableDisplay + ?Sized,
    {
        let mut buf = Vec::new();
        self.write(&mut buf, value)?;
        String::from_utf8(buf).map_err(|e| CliError::Format(format!("UTF-8 error: {e}")))
    }
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self::new(Format::Table)
    }
}

/// Trait for types that can be displayed as a table.
pub trait TableDisplay {
    /// Write the value as a human-readable table.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError>;
}

/// Result of `submit-job`.
#[derive(Debug, Clone, Serialize)]
pub struct SubmitResult {
    /// Job id.
    pub job_id: JobId,
    /// Placement outcome.
    pub outcome: PlacementOutcome,
}

/// Result of `get-cost`.
#[derive(Debug, Clone, Serialize)]
pub struct JobCost {
    /// Job id.
    pub job_id: JobId,
    /// Cost breakdown.
    pub cost: CostBreakdown,
}

fn write_cost<W: Write>(writer: &mut W, cost: &CostBreakdown) -> Result<(), CliError> {
    writeln!(writer, "  Compute:        ${:.4}", cost.compute_usd)?;
    writeln!(writer, "  Data transfer:  ${:.4}", cost.data_transfer_usd)?;
    writeln!(writer, "  Idle capacity:  ${:.4}", cost.idle_opportunity_usd)?;
    writeln!(writer, "  Total:          ${:.4}", cost.total_usd)?;
    Ok(())
}

impl TableDisplay for SubmitResult {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        match &self.outcome {
            PlacementOutcome::Scheduled { assignment } => {
                writeln!(writer, "Job {} scheduled on {}", self.job_id, assignment.node_id)?;
                writeln!(writer, "  Est. latency:   {} ms", assignment.estimated_latency_ms)?;
                write_cost(writer, &assignment.cost)?;
            }
            PlacementOutcome::Infeasible { reason, detail } => {
                writeln!(writer, "Job {} infeasible ({reason})", self.job_id)?;
                writeln!(writer, "  {detail}")?;
            }
            PlacementOutcome::DispatchFailed { node_id, message } => {
                writeln!(writer, "Job {} failed: could not start on {node_id}", self.job_id)?;
                writeln!(writer, "  {message}")?;
            }
        }
        Ok(())
    }
}

impl TableDisplay for JobCost {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(writer, "Cost of {}", self.job_id)?;
        write_cost(writer, &self.cost)
    }
}

impl TableDisplay for JobStatus {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(writer, "Job {}", self.job_id)?;
        writeln!(writer, "══════════════════════════════════")?;
        writeln!(writer, "State:          {}", self.state)?;
        writeln!(writer, "Kind:           {}", self.kind)?;
        writeln!(writer, "Resources:      {}", self.resources)?;
        writeln!(writer, "Submitted:      {}", self.submitted_at.to_rfc3339())?;
        if let Some(assignment) = &self.assignment {
            writeln!(writer, "Node:           {}", assignment.node_id)?;
            writeln!(writer, "Cost:           ${:.4}", assignment.cost.total_usd)?;
        }
        if let Some(started) = self.started_at {
            writeln!(writer, "Started:        {}", started.to_rfc3339())?;
        }
        if let Some(ended) = self.ended_at {
            writeln!(writer, "Ended:          {}", ended.to_rfc3339())?;
        }
        if let Some(code) = self.exit_code {
            writeln!(writer, "Exit code:      {code}")?;
        }
        if let Some(failure) = &self.failure {
            writeln!(writer, "Failure:        {failure}")?;
        }
        if self.requeue_count > 0 {
            writeln!(writer, "Requeues:       {}", self.requeue_count)?;
        }
        if let Some(output) = self.output.as_deref().filter(|o| !o.is_empty()) {
            writeln!(writer)?;
            writeln!(writer, "Output")?;
            for line in output.lines() {
                writeln!(writer, "  {line}")?;
            }
        }
        Ok(())
    }
}

impl TableDisplay for [JobStatus] {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        if self.is_empty() {
            writeln!(writer, "No jobs found.")?;
            return Ok(());
        }
        writeln!(writer, "{:<38} {:<10} {:<16} {:>10}", "JOB", "STATE", "NODE", "COST")?;
        for job in self {
            let node = job.node_id().map_or_else(|| "-".to_string(), ToString::to_string);
            let cost = job
                .cost()
                .map_or_else(|| "-".to_string(), |c| format!("${:.4}", c.total_usd));
            writeln!(writer, "{:<38} {:<10} {:<16} {:>10}", job.job_id, job.state, node, cost)?;
        }
        Ok(())
    }
}

impl TableDisplay for [NodeInfo] {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        if self.is_empty() {
            writeln!(writer, "No nodes found.")?;
            return Ok(());
        }
        writeln!(
            writer,
            "{:<16} {:<12} {:<10} {:>8} {:>10} {:>5} {:>9}",
            "NODE", "ZONE", "STATUS", "CPU", "MEM GB", "GPU", "$/HOUR"
        )?;
        for node in self {
            let free = node.free();
            writeln!(
                writer,
                "{:<16} {:<12} {:<10} {:>8} {:>10} {:>5} {:>9.4}",
                node.id,
                node.location,
                node.status,
                format!("{:.1}/{:.1}", free.cpu_cores(), node.capacity.cpu_cores()),
                format!("{:.1}/{:.1}", free.memory_gb(), node.capacity.memory_gb()),
                format!("{}/{}", free.gpu_count, node.capacity.gpu_count),
                node.cost_per_hour_usd,
            )?;
        }
        Ok(())
    }
}

impl TableDisplay for ClusterSummary {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(writer, "Cluster Status")?;
        writeln!(writer, "══════════════════════════════════")?;
        writeln!(writer, "Nodes")?;
        writeln!(writer, "  Total:          {}", self.total_nodes)?;
        writeln!(writer, "  Active:         {}", self.active_nodes)?;
        writeln!(writer, "  Suspected:      {}", self.suspected_nodes)?;
        writeln!(writer, "  Evicted:        {}", self.evicted_nodes)?;
        writeln!(writer)?;
        writeln!(writer, "Jobs")?;
        writeln!(writer, "  Total:          {}", self.total_jobs)?;
        writeln!(writer, "  Pending:        {}", self.pending_jobs)?;
        writeln!(writer, "  Scheduled:      {}", self.scheduled_jobs)?;
        writeln!(writer, "  Running:        {}", self.running_jobs)?;
        writeln!(writer, "  Completed:      {}", self.completed_jobs)?;
        writeln!(writer, "  Failed:         {}", self.failed_jobs)?;
        Ok(())
    }
}
