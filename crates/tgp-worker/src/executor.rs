//! Container execution.
//!
//! [`ContainerExecutor`] runs each job with `docker run` or `podman run`,
//! enforcing the CPU and memory limits from the dispatch order, and turns
//! the exit status and output tail into an [`ExecutorReport`].

use std::collections::VecDeque;
use std::future::Future;
use std::process::Stdio;

use tgp_proto::{DispatchOrder, ExecutorReport, JobId};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::ContainerRuntime;
use crate::error::{WorkerError, WorkerResult};

/// Runs jobs to completion.
pub trait JobRunner: Send + Sync + 'static {
    /// Run the job and report how it ended. Never reports `Started`.
    fn run(&self, order: DispatchOrder) -> impl Future<Output = ExecutorReport> + Send;

    /// Stop a running job.
    fn stop(&self, job_id: &JobId) -> impl Future<Output = WorkerResult<()>> + Send;
}

/// Runs jobs through the docker or podman CLI.
#[derive(Debug, Clone)]
pub struct ContainerExecutor {
    runtime: ContainerRuntime,
    tail_lines: usize,
}

impl ContainerExecutor {
    /// Create an executor for `runtime` keeping `tail_lines` of output.
    #[must_use]
    pub const fn new(runtime: ContainerRuntime, tail_lines: usize) -> Self {
        Self { runtime, tail_lines }
    }

    /// Arguments for the `run` invocation.
    #[must_use]
    pub fn run_args(&self, order: &DispatchOrder) -> Vec<String> {
        let limits = &order.limits;
        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "--name".to_string(),
            container_name(&order.job_id),
            "--label".to_string(),
            format!("tgp.job-kind={}", order.kind),
            "--cpus".to_string(),
            format!("{:.3}", limits.cpu_cores()),
            "--memory".to_string(),
            format!("{}m", limits.memory_mib),
        ];
        if limits.gpu_count > 0 {
            match self.runtime {
                ContainerRuntime::Docker => {
                    args.push("--gpus".to_string());
                    args.push(limits.gpu_count.to_string());
                }
                ContainerRuntime::Podman => {
                    args.push("--device".to_string());
                    args.push("nvidia.com/gpu=all".to_string());
                }
            }
        }
        args.push(order.image.clone());
        args.extend(order.command.iter().cloned());
        args
    }
}

impl JobRunner for ContainerExecutor {
    async fn run(&self, order: DispatchOrder) -> ExecutorReport {
        let args = self.run_args(&order);
        info!(job_id = %order.job_id, image = %order.image, runtime = self.runtime.binary(), "Starting container");

        let output = Command::new(self.runtime.binary())
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await;

        let output = match output {
            Ok(output) => output,
            Err(e) => {
                warn!(job_id = %order.job_id, error = %e, "Failed to launch container runtime");
                return ExecutorReport::Failed {
                    exit_code: None,
                    error: format!("failed to launch {}: {e}", self.runtime.binary()),
                    output: String::new(),
                };
            }
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        let tail = tail(&combined, self.tail_lines);

        match output.status.code() {
            Some(0) => {
                info!(job_id = %order.job_id, "Container completed");
                ExecutorReport::Completed {
                    exit_code: 0,
                    output: tail,
                }
            }
            code => {
                warn!(job_id = %order.job_id, exit_code = ?code, "Container failed");
                let error = code.map_or_else(
                    || "container terminated by signal".to_string(),
                    |c| format!("container exited with status {c}"),
                );
                ExecutorReport::Failed {
                    exit_code: code,
                    error,
                    output: tail,
                }
            }
        }
    }

    async fn stop(&self, job_id: &JobId) -> WorkerResult<()> {
        let name = container_name(job_id);
        debug!(job_id = %job_id, container = %name, "Removing container");
        let status = Command::new(self.runtime.binary())
            .args(["rm", "-f", &name])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await?;
        if status.success() {
            Ok(())
        } else {
            Err(WorkerError::Runtime(format!("failed to remove container {name}: {status}")))
        }
    }
}

/// Container name for a job.
#[must_use]
pub fn container_name(job_id: &JobId) -> String {
    let safe: String = job_id
        .as_str()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '-' })
        .collect();
    format!("tgp-{safe}")
}

/// The last `lines` lines of `text`.
#[must_use]
pub fn tail(text: &str, lines: usize) -> String {
    if lines == 0 {
        return String::new();
    }
    let mut kept: VecDeque<&str> = VecDeque::with_capacity(lines);
    for line in text.lines() {
        if kept.len() == lines {
            kept.pop_front();
        }
        kept.push_back(line);
    }
    kept.into_iter().collect::<Vec<_>>().join("\n")
}

/// Runner that finishes every job immediately with a fixed report.
#[derive(Debug, Clone)]
pub struct InstantRunner {
    report: ExecutorReport,
}

impl InstantRunner {
    /// Finish every job with `report`.
    #[must_use]
    pub const fn new(report: ExecutorReport) -> Self {
        Self { report }
    }

    /// Finish every job successfully with `output`.
    #[must_use]
    pub fn succeeding(output: impl Into<String>) -> Self {
        Self::new(ExecutorReport::Completed {
            exit_code: 0,
            output: output.into(),
        })
    }
}

impl JobRunner for InstantRunner {
    async fn run(&self, _order: DispatchOrder) -> ExecutorReport {
        self.report.clone()
    }

    async fn stop(&self, _job_id: &JobId) -> WorkerResult<()> {
        Ok(())
    }
}
