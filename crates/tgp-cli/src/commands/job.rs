//! `get-status`, `get-cost` and `list-jobs`.

use std::io::Write;

use tgp_proto::{JobId, JobState};

use crate::client::SchedulerClient;
use crate::error::CliError;
use crate::output::{JobCost, OutputFormat};

/// Job query executor.
#[derive(Debug)]
pub struct JobCommand {
    scheduler_url: String,
}

impl JobCommand {
    /// Create a new job query command.
    #[must_use]
    pub fn new(scheduler_url: impl Into<String>) -> Self {
        Self {
            scheduler_url: scheduler_url.into(),
        }
    }

    /// Print a job's status.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the job is unknown.
    pub async fn status<W: Write>(&self, writer: &mut W, format: &OutputFormat, job_id: &str) -> Result<(), CliError> {
        let mut client = SchedulerClient::connect(&self.scheduler_url).await?;
        let status = client.get_status(JobId::new(job_id)).await?;
        format.write(writer, &status)
    }

    /// Print a job's cost breakdown.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the job has no cost yet.
    pub async fn cost<W: Write>(&self, writer: &mut W, format: &OutputFormat, job_id: &str) -> Result<(), CliError> {
        let mut client = SchedulerClient::connect(&self.scheduler_url).await?;
        let (job_id, cost) = client.get_cost(JobId::new(job_id)).await?;
        format.write(writer, &JobCost { job_id, cost })
    }

    /// Print the job listing.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn list<W: Write>(
        &self,
        writer: &mut W,
        format: &OutputFormat,
        state: Option<JobState>,
    ) -> Result<(), CliError> {
        let mut client = SchedulerClient::connect(&self.scheduler_url).await?;
        let jobs = client.list_jobs(state).await?;
        format.write(writer, jobs.as_slice())
    }
}
