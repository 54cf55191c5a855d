//! CLI commands against a live scheduler.

use tgp_cli::cli::{Cli, Commands, Format};
use tgp_cli::commands::{ClusterCommand, JobCommand, SubmitCommand};
use tgp_cli::{CliError, OutputFormat, SchedulerClient};
use tgp_proto::{InfeasibleReason, NodeId, NodeSpec, Resources};
use tgp_server::{SchedulerServer, ServerConfig};
use tokio::net::TcpListener;

use clap::Parser;

async fn start_server(nodes: Vec<NodeSpec>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let mut server = SchedulerServer::new(ServerConfig::new(addr));
    for spec in nodes {
        server.scheduler().register_node(spec).unwrap();
    }
    tokio::spawn(async move { server.serve_listener(listener).await });
    format!("ws://{addr}")
}

fn submit_args(argv: &[&str]) -> tgp_cli::SubmitArgs {
    let mut full = vec!["tgp", "submit-job"];
    full.extend_from_slice(argv);
    match Cli::parse_from(full).command {
        Commands::SubmitJob(args) => args,
        other => panic!("unexpected command: {other:?}"),
    }
}

#[tokio::test]
async fn submit_picks_cheapest_node() {
    let url = start_server(vec![
        NodeSpec::new(NodeId::new("pricey"), Resources::new(8000, 16384, 0), 0.9),
        NodeSpec::new(NodeId::new("cheap"), Resources::new(8000, 16384, 0), 0.1),
    ])
    .await;

    let mut out = Vec::new();
    let format = OutputFormat::new(Format::Json);
    SubmitCommand::new(&url)
        .execute(&mut out, &format, &submit_args(&["--job-id", "j1", "--cpu", "2", "--memory", "4"]))
        .await
        .unwrap();

    let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(value["job_id"], "j1");
    assert_eq!(value["outcome"]["assignment"]["node_id"], "cheap");
}

#[tokio::test]
async fn infeasible_submit_is_an_error_after_printing() {
    let url = start_server(vec![NodeSpec::new(NodeId::new("small"), Resources::new(1000, 1024, 0), 0.1)]).await;

    let mut out = Vec::new();
    let err = SubmitCommand::new(&url)
        .execute(&mut out, &OutputFormat::default(), &submit_args(&["--job-id", "big", "--cpu", "4"]))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CliError::Infeasible {
            reason: InfeasibleReason::NoCapacity,
            ..
        }
    ));
    assert!(String::from_utf8(out).unwrap().contains("infeasible"));
}

#[tokio::test]
async fn status_of_unknown_job_is_a_scheduler_error() {
    let url = start_server(Vec::new()).await;

    let mut out = Vec::new();
    let err = JobCommand::new(&url)
        .status(&mut out, &OutputFormat::default(), "missing")
        .await
        .unwrap_err();
    assert!(matches!(err, CliError::Scheduler { .. }));
}

#[tokio::test]
async fn cluster_queries_render_tables() {
    let url = start_server(vec![NodeSpec::new(NodeId::new("n1"), Resources::new(4000, 8192, 0), 0.2)]).await;
    let format = OutputFormat::default();
    let cluster = ClusterCommand::new(&url);

    let mut out = Vec::new();
    cluster.status(&mut out, &format).await.unwrap();
    assert!(String::from_utf8(out).unwrap().contains("Total:          1"));

    let mut out = Vec::new();
    cluster.nodes(&mut out, &format).await.unwrap();
    assert!(String::from_utf8(out).unwrap().contains("n1"));
}

#[tokio::test]
async fn client_reports_server_version() {
    let url = start_server(Vec::new()).await;
    let client = SchedulerClient::connect(&url).await.unwrap();
    assert!(!client.server_version().is_empty());
    client.close().await.unwrap();
}
