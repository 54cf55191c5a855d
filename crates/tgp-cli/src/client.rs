//! Scheduler WebSocket client.
//!
//! ```rust,no_run
//! use tgp_cli::client::SchedulerClient;
//!
//! # async fn example() -> Result<(), tgp_cli::CliError> {
//! let mut client = SchedulerClient::connect("ws://127.0.0.1:8080").await?;
//! let summary = client.cluster_status().await?;
//! println!("nodes: {}", summary.total_nodes);
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tgp_proto::{
    CLIENT_PROTOCOL_VERSION, ClientMessage, ClientResponse, ClusterSummary, CostBreakdown, JobId,
    JobSpec, JobState, JobStatus, NodeInfo, PlacementOutcome,
};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, trace, warn};

use crate::error::CliError;

/// Default connection timeout.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default request timeout.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for the scheduler's request/response protocol.
pub struct SchedulerClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    server_version: String,
    request_timeout: Duration,
}

impl std::fmt::Debug for SchedulerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerClient")
            .field("server_version", &self.server_version)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl SchedulerClient {
    /// Connect to the scheduler and perform the handshake.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is not `ws://` or `wss://`, the
    /// connection fails, or the scheduler refuses the handshake.
    pub async fn connect(url: &str) -> Result<Self, CliError> {
        Self::connect_with_timeout(url, DEFAULT_CONNECT_TIMEOUT).await
    }

    /// Connect with a custom timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if connection or handshake fails.
    pub async fn connect_with_timeout(url: &str, connect_timeout: Duration) -> Result<Self, CliError> {
        validate_url(url)?;
        debug!(url = %url, "Connecting to scheduler");

        let (ws, _response) = timeout(connect_timeout, connect_async(url))
            .await
            .map_err(|_| CliError::Timeout("connection timed out".into()))?
            .map_err(|e| CliError::Connection(e.to_string()))?;

        let mut client = Self {
            ws,
            server_version: String::new(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        };

        match client.send_request(ClientMessage::hello(env!("CARGO_PKG_VERSION"))).await? {
            ClientResponse::Welcome {
                server_version,
                protocol_version,
            } => {
                if protocol_version != CLIENT_PROTOCOL_VERSION {
                    warn!(
                        server = protocol_version,
                        client = CLIENT_PROTOCOL_VERSION,
                        "Protocol version mismatch"
                    );
                }
                debug!(version = %server_version, "Handshake complete");
                client.server_version = server_version;
                Ok(client)
            }
            other => Err(unexpected("hello", &other)),
        }
    }

    /// Set the request timeout.
    pub fn set_request_timeout(&mut self, timeout: Duration) {
        self.request_timeout = timeout;
    }

    /// The scheduler's version string.
    #[must_use]
    pub fn server_version(&self) -> &str {
        &self.server_version
    }

    async fn send_request(&mut self, request: ClientMessage) -> Result<ClientResponse, CliError> {
        let request_type = request.request_type();
        let json = request.to_json().map_err(|e| CliError::Protocol(e.to_string()))?;

        trace!(request_type, "Sending request");
        self.ws
            .send(Message::Text(json))
            .await
            .map_err(|e| CliError::Connection(e.to_string()))?;

        loop {
            let message = timeout(self.request_timeout, self.ws.next())
                .await
                .map_err(|_| CliError::Timeout(format!("request '{request_type}' timed out")))?
                .ok_or_else(|| CliError::Connection("connection closed".into()))?
                .map_err(|e| CliError::Connection(e.to_string()))?;

            match message {
                Message::Text(text) => {
                    let response =
                        ClientResponse::from_json(&text).map_err(|e| CliError::Protocol(e.to_string()))?;
                    if let ClientResponse::Error { code, message } = response {
                        return Err(CliError::Scheduler { code, message });
                    }
                    trace!(request_type, "Received response");
                    return Ok(response);
                }
                Message::Ping(_) | Message::Pong(_) => continue,
                Message::Close(_) => {
                    return Err(CliError::Connection("connection closed by scheduler".into()));
                }
                _ => return Err(CliError::Protocol("unexpected message type".into())),
            }
        }
    }

    /// Close the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the close handshake fails.
    pub async fn close(mut self) -> Result<(), CliError> {
        self.ws
            .close(None)
            .await
            .map_err(|e| CliError::Connection(e.to_string()))
    }

    // ==================== Jobs ====================

    /// Submit a job. An infeasible placement is returned as an outcome, not
    /// an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the scheduler rejects it.
    pub async fn submit_job(&mut self, spec: JobSpec) -> Result<(JobId, PlacementOutcome), CliError> {
        match self.send_request(ClientMessage::SubmitJob { spec }).await? {
            ClientResponse::JobSubmitted { job_id, outcome } => Ok((job_id, outcome)),
            other => Err(unexpected("submit_job", &other)),
        }
    }

    /// Fetch a job's status.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the job is unknown.
    pub async fn get_status(&mut self, job_id: JobId) -> Result<JobStatus, CliError> {
        match self.send_request(ClientMessage::GetJobStatus { job_id }).await? {
            ClientResponse::JobStatus { status } => Ok(status),
            other => Err(unexpected("get_job_status", &other)),
        }
    }

    /// Fetch a placed job's cost breakdown.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails, the job is unknown, or it was
    /// never placed.
    pub async fn get_cost(&mut self, job_id: JobId) -> Result<(JobId, CostBreakdown), CliError> {
        match self.send_request(ClientMessage::GetJobCost { job_id }).await? {
            ClientResponse::JobCost { job_id, cost } => Ok((job_id, cost)),
            other => Err(unexpected("get_job_cost", &other)),
        }
    }

    /// List jobs, optionally filtered by state.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn list_jobs(&mut self, state_filter: Option<JobState>) -> Result<Vec<JobStatus>, CliError> {
        match self.send_request(ClientMessage::ListJobs { state_filter }).await? {
            ClientResponse::Jobs { jobs } => Ok(jobs),
            other => Err(unexpected("list_jobs", &other)),
        }
    }

    // ==================== Cluster ====================

    /// Fetch cluster counters.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn cluster_status(&mut self) -> Result<ClusterSummary, CliError> {
        match self.send_request(ClientMessage::ClusterStatus).await? {
            ClientResponse::ClusterStatus { summary } => Ok(summary),
            other => Err(unexpected("cluster_status", &other)),
        }
    }

    /// List registered nodes.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn list_nodes(&mut self) -> Result<Vec<NodeInfo>, CliError> {
        match self.send_request(ClientMessage::ListNodes).await? {
            ClientResponse::Nodes { nodes } => Ok(nodes),
            other => Err(unexpected("list_nodes", &other)),
        }
    }
}

fn validate_url(url: &str) -> Result<(), CliError> {
    if url.starts_with("ws://") || url.starts_with("wss://") {
        Ok(())
    } else {
        Err(CliError::Config(format!(
            "invalid scheduler URL: {url}, must start with ws:// or wss://"
        )))
    }
}

fn unexpected(request: &str, response: &ClientResponse) -> CliError {
    CliError::Protocol(format!("unexpected response to {request}: {response:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("ws://localhost:8080", true; "plain")]
    #[test_case("wss://sched.example.com", true; "tls")]
    #[test_case("http://localhost:8080", false; "http")]
    #[test_case("localhost:8080", false; "no scheme")]
    fn test_validate_url(url: &str, ok: bool) {
        assert_eq!(validate_url(url).is_ok(), ok);
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_url() {
        let err = SchedulerClient::connect("http://localhost:1").await.unwrap_err();
        assert!(matches!(err, CliError::Config(_)));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let err = SchedulerClient::connect_with_timeout("ws://127.0.0.1:1", Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, CliError::Connection(_) | CliError::Timeout(_)));
    }
}
