//! `cluster-status` and `list-nodes`.

use std::io::Write;

use crate::client::SchedulerClient;
use crate::error::CliError;
use crate::output::OutputFormat;

/// Cluster query executor.
#[derive(Debug)]
pub struct ClusterCommand {
    scheduler_url: String,
}

impl ClusterCommand {
    /// Create a new cluster query command.
    #[must_use]
    pub fn new(scheduler_url: impl Into<String>) -> Self {
        Self {
            scheduler_url: scheduler_url.into(),
        }
    }

    /// Print node and job counters.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn status<W: Write>(&self, writer: &mut W, format: &OutputFormat) -> Result<(), CliError> {
        let mut client = SchedulerClient::connect(&self.scheduler_url).await?;
        let summary = client.cluster_status().await?;
        format.write(writer, &summary)
    }

    /// Print the node listing.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn nodes<W: Write>(&self, writer: &mut W, format: &OutputFormat) -> Result<(), CliError> {
        let mut client = SchedulerClient::connect(&self.scheduler_url).await?;
        let nodes = client.list_nodes().await?;
        format.write(writer, nodes.as_slice())
    }
}
