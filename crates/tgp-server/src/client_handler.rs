//! Client connection handler.
//!
//! Serves the request/response protocol used by the `tgp` CLI. Each request
//! maps onto one [`SchedulerService`] call.

use std::sync::Arc;

use futures::{Sink, SinkExt, Stream, StreamExt};
use tgp_proto::client::error_codes;
use tgp_proto::{CLIENT_PROTOCOL_VERSION, ClientMessage, ClientResponse};
use tgp_scheduler::{SchedulerError, SchedulerService};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};

/// Handle a client WebSocket connection.
///
/// Takes over after the initial `Hello` identified the connection as a
/// client; `protocol_version` is the one that `Hello` carried.
///
/// # Errors
///
/// Returns an error if a response cannot be written.
pub async fn handle_client_connection<S>(
    mut ws: S,
    scheduler: Arc<SchedulerService>,
    config: Arc<ServerConfig>,
    protocol_version: u32,
) -> ServerResult<()>
where
    S: Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + Sink<WsMessage>
        + Unpin
        + Send,
    <S as Sink<WsMessage>>::Error: std::fmt::Display,
{
    if protocol_version != CLIENT_PROTOCOL_VERSION {
        let response = protocol_mismatch(protocol_version);
        send_response(&mut ws, &response).await?;
        return Ok(());
    }
    send_response(&mut ws, &ClientResponse::welcome(env!("CARGO_PKG_VERSION"))).await?;
    info!("Client connected");

    loop {
        let text = match ws.next().await {
            Some(Ok(WsMessage::Text(text))) => text,
            Some(Ok(WsMessage::Close(_))) | None => {
                info!("Client disconnected");
                break;
            }
            Some(Ok(WsMessage::Ping(data))) => {
                if let Err(e) = ws.send(WsMessage::Pong(data)).await {
                    warn!(error = %e, "Failed to send pong");
                }
                continue;
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                warn!(error = %e, "WebSocket error");
                break;
            }
        };

        if text.len() > config.max_message_size {
            let response = ClientResponse::error(
                error_codes::INVALID_REQUEST,
                format!(
                    "message of {} bytes exceeds limit of {}",
                    text.len(),
                    config.max_message_size
                ),
            );
            send_response(&mut ws, &response).await?;
            continue;
        }

        let response = match ClientMessage::from_json(&text) {
            Ok(request) => {
                debug!(request_type = request.request_type(), "Processing client request");
                handle_request(request, &scheduler)
            }
            Err(e) => ClientResponse::error(error_codes::INVALID_REQUEST, format!("invalid message: {e}")),
        };
        send_response(&mut ws, &response).await?;
    }

    Ok(())
}

/// Handle a single client request.
#[must_use]
pub fn handle_request(request: ClientMessage, scheduler: &SchedulerService) -> ClientResponse {
    match request {
        ClientMessage::Hello {
            protocol_version, ..
        } => {
            if protocol_version != CLIENT_PROTOCOL_VERSION {
                return protocol_mismatch(protocol_version);
            }
            ClientResponse::welcome(env!("CARGO_PKG_VERSION"))
        }

        ClientMessage::SubmitJob { spec } => match scheduler.submit(spec) {
            Ok(submission) => ClientResponse::JobSubmitted {
                job_id: submission.job_id,
                outcome: submission.outcome,
            },
            Err(e) => error_response(&e),
        },

        ClientMessage::GetJobStatus { job_id } => match scheduler.get_status(&job_id) {
            Ok(status) => ClientResponse::JobStatus { status },
            Err(e) => error_response(&e),
        },

        ClientMessage::GetJobCost { job_id } => match scheduler.get_cost(&job_id) {
            Ok(cost) => ClientResponse::JobCost { job_id, cost },
            Err(e) => error_response(&e),
        },

        ClientMessage::ClusterStatus => ClientResponse::ClusterStatus {
            summary: scheduler.cluster_status(),
        },

        ClientMessage::ListNodes => ClientResponse::Nodes {
            nodes: scheduler.list_nodes(),
        },

        ClientMessage::ListJobs { state_filter } => ClientResponse::Jobs {
            jobs: scheduler.list_jobs(state_filter),
        },

        ClientMessage::Ping { timestamp } => ClientResponse::Pong { timestamp },
    }
}

/// Map a scheduler error onto a wire error.
#[must_use]
pub fn error_response(err: &SchedulerError) -> ClientResponse {
    let code = match err {
        SchedulerError::InvalidJob(_) | SchedulerError::InvalidCostInput(_) => error_codes::VALIDATION,
        SchedulerError::NotFound(_) => error_codes::NOT_FOUND,
        SchedulerError::DuplicateJob(_) => error_codes::DUPLICATE_JOB,
        SchedulerError::CostUnavailable(_) => error_codes::COST_UNAVAILABLE,
        SchedulerError::Registry(_) | SchedulerError::Lifecycle(_) => {
            warn!(error = %err, "Internal scheduler error");
            error_codes::INTERNAL
        }
    };
    ClientResponse::error(code, err.to_string())
}

fn protocol_mismatch(got: u32) -> ClientResponse {
    ClientResponse::error(
        error_codes::PROTOCOL_MISMATCH,
        format!("protocol version mismatch: expected {CLIENT_PROTOCOL_VERSION}, got {got}"),
    )
}

/// Send a client response.
async fn send_response<S>(ws: &mut S, response: &ClientResponse) -> ServerResult<()>
where
    S: Sink<WsMessage> + Unpin,
    <S as Sink<WsMessage>>::Error: std::fmt::Display,
{
    let json = response.to_json()?;
    ws.send(WsMessage::Text(json))
        .await
        .map_err(|e| ServerError::Transport(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tgp_proto::{
        InfeasibleReason, JobId, JobSpec, JobState, NodeId, NodeSpec, PlacementOutcome, Resources,
    };
    use tgp_scheduler::SchedulerConfig;
    use test_case::test_case;

    fn scheduler_with_node() -> SchedulerService {
        let scheduler = SchedulerService::new(SchedulerConfig::default());
        scheduler
            .register_node(NodeSpec::new(NodeId::new("vps-1"), Resources::new(4000, 8192, 0), 0.10))
            .unwrap();
        scheduler
    }

    fn submit(scheduler: &SchedulerService, spec: JobSpec) -> ClientResponse {
        handle_request(ClientMessage::SubmitJob { spec }, scheduler)
    }

    fn error_code(response: &ClientResponse) -> Option<u32> {
        match response {
            ClientResponse::Error { code, .. } => Some(*code),
            _ => None,
        }
    }

    // ==================== Request Tests ====================

    #[test]
    fn test_submit_and_query() {
        let scheduler = scheduler_with_node();
        let spec = JobSpec::new(JobId::new("j1"), Resources::new(1000, 1024, 0));

        match submit(&scheduler, spec) {
            ClientResponse::JobSubmitted { job_id, outcome } => {
                assert_eq!(job_id, JobId::new("j1"));
                assert!(outcome.is_scheduled());
            }
            other => panic!("unexpected response: {other:?}"),
        }

        let status = handle_request(
            ClientMessage::GetJobStatus {
                job_id: JobId::new("j1"),
            },
            &scheduler,
        );
        assert!(matches!(
            status,
            ClientResponse::JobStatus { status } if status.state == JobState::Scheduled
        ));

        let cost = handle_request(
            ClientMessage::GetJobCost {
                job_id: JobId::new("j1"),
            },
            &scheduler,
        );
        assert!(matches!(cost, ClientResponse::JobCost { cost, .. } if cost.total_usd == 0.10));
    }

    #[test]
    fn test_infeasible_is_not_an_error() {
        let scheduler = scheduler_with_node();
        let spec = JobSpec::new(JobId::new("big"), Resources::new(99_000, 1024, 0));
        match submit(&scheduler, spec) {
            ClientResponse::JobSubmitted {
                outcome: PlacementOutcome::Infeasible { reason, .. },
                ..
            } => assert_eq!(reason, InfeasibleReason::NoCapacity),
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[test]
    fn test_error_codes() {
        let scheduler = scheduler_with_node();

        let bad = JobSpec::new(JobId::new("bad"), Resources::new(1000, 1024, 0)).with_duration_hours(-1.0);
        assert_eq!(error_code(&submit(&scheduler, bad)), Some(error_codes::VALIDATION));

        let missing = handle_request(
            ClientMessage::GetJobStatus {
                job_id: JobId::new("nope"),
            },
            &scheduler,
        );
        assert_eq!(error_code(&missing), Some(error_codes::NOT_FOUND));

        let big = JobSpec::new(JobId::new("big"), Resources::new(99_000, 1024, 0));
        submit(&scheduler, big);
        let no_cost = handle_request(
            ClientMessage::GetJobCost {
                job_id: JobId::new("big"),
            },
            &scheduler,
        );
        assert_eq!(error_code(&no_cost), Some(error_codes::COST_UNAVAILABLE));

        let dup = JobSpec::new(JobId::new("big"), Resources::new(1000, 1024, 0));
        assert_eq!(error_code(&submit(&scheduler, dup)), Some(error_codes::DUPLICATE_JOB));
    }

    #[test_case(ClientMessage::ClusterStatus; "cluster status")]
    #[test_case(ClientMessage::ListNodes; "list nodes")]
    #[test_case(ClientMessage::ListJobs { state_filter: None }; "list jobs")]
    #[test_case(ClientMessage::Ping { timestamp: 7 }; "ping")]
    fn test_queries_never_error(request: ClientMessage) {
        let scheduler = scheduler_with_node();
        assert!(!handle_request(request, &scheduler).is_error());
    }

    #[test]
    fn test_hello_version_mismatch() {
        let scheduler = scheduler_with_node();
        let response = handle_request(
            ClientMessage::Hello {
                version: "0.0.0".into(),
                protocol_version: 42,
            },
            &scheduler,
        );
        assert_eq!(error_code(&response), Some(error_codes::PROTOCOL_MISMATCH));
    }
}
