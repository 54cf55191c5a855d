//! `submit-job`.

use std::io::Write;

use tgp_proto::{JobId, JobSpec, PlacementOutcome, Resources};

use crate::cli::SubmitArgs;
use crate::client::SchedulerClient;
use crate::error::CliError;
use crate::output::{OutputFormat, SubmitResult};

/// Submit command executor.
#[derive(Debug)]
pub struct SubmitCommand {
    scheduler_url: String,
}

impl SubmitCommand {
    /// Create a new submit command.
    #[must_use]
    pub fn new(scheduler_url: impl Into<String>) -> Self {
        Self {
            scheduler_url: scheduler_url.into(),
        }
    }

    /// Submit the job and print the placement.
    ///
    /// The outcome is printed either way; an infeasible placement then
    /// returns [`CliError::Infeasible`] so the process exits non-zero.
    ///
    /// # Errors
    ///
    /// Returns an error if the arguments are invalid, the request fails, or
    /// the job could not be placed.
    pub async fn execute<W: Write>(
        &self,
        writer: &mut W,
        format: &OutputFormat,
        args: &SubmitArgs,
    ) -> Result<(), CliError> {
        let spec = build_spec(args)?;
        let mut client = SchedulerClient::connect(&self.scheduler_url).await?;
        let (job_id, outcome) = client.submit_job(spec).await?;

        let result = SubmitResult { job_id, outcome };
        format.write(writer, &result)?;

        match result.outcome {
            PlacementOutcome::Scheduled { .. } => Ok(()),
            PlacementOutcome::Infeasible { reason, detail } => Err(CliError::Infeasible {
                job_id: result.job_id.to_string(),
                reason,
                detail,
            }),
            PlacementOutcome::DispatchFailed { node_id, message } => Err(CliError::DispatchFailed {
                job_id: result.job_id.to_string(),
                node_id: node_id.to_string(),
                message,
            }),
        }
    }
}

/// Build a job spec from command-line arguments.
///
/// # Errors
///
/// Returns an error if a resource amount cannot be represented.
pub fn build_spec(args: &SubmitArgs) -> Result<JobSpec, CliError> {
    let resources = Resources::from_units(args.cpu, args.memory, args.gpu)
        .map_err(|e| CliError::InvalidArgument(e.to_string()))?;
    let id = args.job_id.as_deref().map_or_else(|| JobId::new(""), JobId::new);

    let mut spec = JobSpec::new(id, resources)
        .with_kind(args.kind.into())
        .with_command(args.command.clone())
        .with_duration_hours(args.duration)
        .with_data_gb(args.data_gb);
    if let Some(image) = &args.image {
        spec = spec.with_image(image.clone());
    }
    if let Some(latency) = args.latency {
        spec = spec.with_max_latency_ms(latency);
    }
    if let Some(budget) = args.budget {
        spec = spec.with_budget(budget);
    }
    if let Some(deadline) = args.deadline {
        spec = spec.with_deadline(deadline);
    }
    Ok(spec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Commands};
    use clap::Parser;
    use tgp_proto::JobKind;

    fn args(argv: &[&str]) -> SubmitArgs {
        let mut full = vec!["tgp", "submit-job"];
        full.extend_from_slice(argv);
        match Cli::parse_from(full).command {
            Commands::SubmitJob(args) => args,
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_build_spec_units() {
        let spec = build_spec(&args(&["--job-id", "j1", "--cpu", "2", "--memory", "4", "--gpu", "1"])).unwrap();
        assert_eq!(spec.id.as_str(), "j1");
        assert_eq!(spec.resources, Resources::new(2000, 4096, 1));
    }

    #[test]
    fn test_build_spec_sla() {
        let spec = build_spec(&args(&["--budget", "0.25", "--latency", "150", "--kind", "training"])).unwrap();
        assert_eq!(spec.sla.budget_usd, Some(0.25));
        assert_eq!(spec.sla.max_latency_ms, 150);
        assert_eq!(spec.kind, JobKind::Training);
    }

    #[test]
    fn test_build_spec_without_id_leaves_it_empty() {
        let spec = build_spec(&args(&[])).unwrap();
        assert!(spec.id.is_empty());
    }

    #[test]
    fn test_build_spec_rejects_negative_cpu() {
        let err = build_spec(&args(&["--cpu=-1"])).unwrap_err();
        assert!(matches!(err, CliError::InvalidArgument(_)));
    }
}
