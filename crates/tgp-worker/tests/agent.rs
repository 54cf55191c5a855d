//! Worker agent against a live scheduler.

use std::sync::Arc;
use std::time::Duration;

use tgp_proto::{ExecutorReport, FailureReason, JobId, JobSpec, JobState, NodeId, NodeSpec, Resources};
use tgp_scheduler::SchedulerService;
use tgp_server::{SchedulerServer, ServerConfig};
use tgp_worker::{InstantRunner, JobRunner, WorkerAgent, WorkerConfig};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

async fn start_server() -> (String, Arc<SchedulerService>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let mut server = SchedulerServer::new(ServerConfig::new(addr));
    let scheduler = server.scheduler();
    tokio::spawn(async move { server.serve_listener(listener).await });
    (format!("ws://{addr}"), scheduler)
}

fn start_agent<R: JobRunner>(url: String, node: &str, runner: R) -> (watch::Sender<bool>, JoinHandle<()>) {
    let config = WorkerConfig {
        scheduler_url: url,
        ..WorkerConfig::default()
    };
    let spec = NodeSpec::new(NodeId::new(node), Resources::new(4000, 8192, 0), 0.5);
    let mut agent = WorkerAgent::new(config, spec, runner);
    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(async move {
        agent.run(rx).await.unwrap();
    });
    (tx, handle)
}

async fn wait_for<F: Fn(&SchedulerService) -> bool>(scheduler: &SchedulerService, check: F) {
    for _ in 0..100 {
        if check(scheduler) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition never became true");
}

fn job_state(scheduler: &SchedulerService, id: &str) -> Option<JobState> {
    scheduler.get_status(&JobId::new(id)).ok().map(|s| s.state)
}

#[tokio::test]
async fn agent_registers_runs_and_reports_completion() {
    let (url, scheduler) = start_server().await;
    let (shutdown, handle) = start_agent(url, "w1", InstantRunner::succeeding("hello"));

    wait_for(&scheduler, |s| s.list_nodes().len() == 1).await;

    let spec = JobSpec::new(JobId::new("j1"), Resources::new(1000, 1024, 0));
    let submission = scheduler.submit(spec).unwrap();
    assert!(submission.outcome.is_scheduled());

    wait_for(&scheduler, |s| job_state(s, "j1") == Some(JobState::Completed)).await;
    let status = scheduler.get_status(&JobId::new("j1")).unwrap();
    assert_eq!(status.exit_code, Some(0));
    assert_eq!(status.output.as_deref(), Some("hello"));
    assert!(status.started_at.is_some());

    // Capacity returns once the job finished.
    let node = scheduler.list_nodes().remove(0);
    assert_eq!(node.free(), node.capacity);

    shutdown.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
}

#[tokio::test]
async fn agent_reports_failures() {
    let (url, scheduler) = start_server().await;
    let runner = InstantRunner::new(ExecutorReport::Failed {
        exit_code: Some(137),
        error: "container exited with status 137".into(),
        output: "killed".into(),
    });
    let (shutdown, handle) = start_agent(url, "w2", runner);
    wait_for(&scheduler, |s| s.list_nodes().len() == 1).await;

    scheduler
        .submit(JobSpec::new(JobId::new("oom"), Resources::new(1000, 1024, 0)))
        .unwrap();

    wait_for(&scheduler, |s| job_state(s, "oom") == Some(JobState::Failed)).await;
    let status = scheduler.get_status(&JobId::new("oom")).unwrap();
    assert_eq!(status.exit_code, Some(137));
    assert!(matches!(status.failure, Some(FailureReason::Executor { .. })));

    shutdown.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
}

#[tokio::test]
async fn agent_gives_up_when_scheduler_is_unreachable() {
    let config = WorkerConfig {
        scheduler_url: "ws://127.0.0.1:1".into(),
        reconnect: tgp_worker::ReconnectConfig {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(20),
            backoff_multiplier: 2.0,
            max_attempts: Some(2),
        },
        ..WorkerConfig::default()
    };
    let spec = NodeSpec::new(NodeId::new("lost"), Resources::new(1000, 1024, 0), 0.1);
    let mut agent = WorkerAgent::new(config, spec, InstantRunner::succeeding(""));
    let (_tx, rx) = watch::channel(false);

    let result = tokio::time::timeout(Duration::from_secs(10), agent.run(rx)).await.unwrap();
    assert!(matches!(result, Err(tgp_worker::WorkerError::Connection(_))));
}
