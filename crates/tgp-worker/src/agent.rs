//! The worker agent: one session per scheduler connection.
//!
//! ```text
//!   connect ──► Register ──► Registered ──► loop {
//!                  ▲                          heartbeat tick  ─► Heartbeat
//!                  │                          RunJob          ─► spawn runner
//!                  └── Error{reregister} ◄──  runner report   ─► JobUpdate
//!                                             CancelJob       ─► abort + stop
//!                                           }
//! ```
//!
//! Job reports are queued on a channel owned by the agent, so a report
//! produced while disconnected is delivered after the next registration.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tgp_proto::worker::error_codes;
use tgp_proto::{DispatchOrder, ExecutorReport, JobId, NodeSpec, SchedulerMessage, WorkerMessage};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, trace, warn};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::executor::JobRunner;
use crate::resources::RunningJobs;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

const UPDATE_CHANNEL_CAPACITY: usize = 256;
const REGISTER_TIMEOUT: Duration = Duration::from_secs(10);

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Shutdown was requested.
    Shutdown,
    /// The scheduler closed the connection.
    Disconnected,
}

/// Worker agent.
#[derive(Debug)]
pub struct WorkerAgent<R> {
    config: WorkerConfig,
    spec: NodeSpec,
    runner: Arc<R>,
    jobs: RunningJobs,
    updates_tx: mpsc::Sender<(JobId, ExecutorReport)>,
    updates_rx: mpsc::Receiver<(JobId, ExecutorReport)>,
}

impl<R: JobRunner> WorkerAgent<R> {
    /// Create an agent that registers `spec` and runs jobs with `runner`.
    #[must_use]
    pub fn new(config: WorkerConfig, spec: NodeSpec, runner: R) -> Self {
        let (updates_tx, updates_rx) = mpsc::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            jobs: RunningJobs::new(spec.capacity),
            config,
            spec,
            runner: Arc::new(runner),
            updates_tx,
            updates_rx,
        }
    }

    /// The registered node spec.
    #[must_use]
    pub const fn spec(&self) -> &NodeSpec {
        &self.spec
    }

    /// Jobs currently running.
    #[must_use]
    pub const fn running(&self) -> &RunningJobs {
        &self.jobs
    }

    /// Run sessions until shutdown, reconnecting with backoff.
    ///
    /// # Errors
    ///
    /// Returns an error if the scheduler rejects the registration or the
    /// reconnection budget is exhausted.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> WorkerResult<()> {
        let mut failures = 0u32;
        loop {
            match self.run_session(&mut shutdown).await {
                Ok(SessionEnd::Shutdown) => return Ok(()),
                Ok(SessionEnd::Disconnected) => {
                    info!("Scheduler closed the connection");
                    failures = 0;
                }
                Err(e @ WorkerError::Registration { .. }) => return Err(e),
                Err(e) => {
                    failures = failures.saturating_add(1);
                    warn!(error = %e, attempt = failures, "Scheduler session failed");
                }
            }

            if !self.config.reconnect.should_reconnect(failures) {
                return Err(WorkerError::Connection(format!(
                    "giving up after {failures} failed attempts"
                )));
            }
            let delay = self.config.reconnect.delay_for_attempt(failures.max(1));
            debug!(delay_ms = delay.as_millis() as u64, "Reconnecting");
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => return Ok(()),
            }
        }
    }

    /// Run one session: connect, register, then serve until the connection
    /// ends or shutdown is requested.
    ///
    /// # Errors
    ///
    /// Returns an error if connecting, registering or writing fails.
    pub async fn run_session(&mut self, shutdown: &mut watch::Receiver<bool>) -> WorkerResult<SessionEnd> {
        let (ws, _) = connect_async(self.config.scheduler_url.as_str()).await?;
        let (mut sink, mut source) = ws.split();

        send(&mut sink, &WorkerMessage::register(self.spec.clone())).await?;
        let interval_secs = tokio::time::timeout(REGISTER_TIMEOUT, await_registered(&mut source))
            .await
            .map_err(|_| WorkerError::Connection("timed out waiting for registration".into()))??;
        info!(node_id = %self.spec.id, heartbeat_secs = interval_secs, "Registered with scheduler");

        let mut heartbeat = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    send(&mut sink, &WorkerMessage::heartbeat(self.spec.id.clone(), self.jobs.free())).await?;
                }
                Some((job_id, report)) = self.updates_rx.recv() => {
                    if report.is_terminal() {
                        self.jobs.finish(&job_id);
                    }
                    send(&mut sink, &WorkerMessage::job_update(self.spec.id.clone(), job_id, report)).await?;
                }
                msg = source.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        let msg = SchedulerMessage::from_json(&text)?;
                        self.handle_message(msg, &mut sink).await?;
                    }
                    Some(Ok(Message::Close(_))) | None => return Ok(SessionEnd::Disconnected),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                },
                _ = shutdown.changed() => {
                    let _ = sink.close().await;
                    return Ok(SessionEnd::Shutdown);
                }
            }
        }
    }

    async fn handle_message(&mut self, msg: SchedulerMessage, sink: &mut WsSink) -> WorkerResult<()> {
        match msg {
            SchedulerMessage::Registered { node_id, .. } => {
                info!(node_id = %node_id, "Re-registered with scheduler");
            }
            SchedulerMessage::HeartbeatAck { .. } => trace!("Heartbeat acknowledged"),
            SchedulerMessage::RunJob { order } => self.start_job(order),
            SchedulerMessage::CancelJob { job_id, reason } => {
                info!(job_id = %job_id, reason = %reason, "Cancelling job");
                if self.jobs.cancel(&job_id) {
                    let runner = Arc::clone(&self.runner);
                    tokio::spawn(async move {
                        if let Err(e) = runner.stop(&job_id).await {
                            warn!(job_id = %job_id, error = %e, "Failed to stop container");
                        }
                    });
                }
            }
            SchedulerMessage::Error {
                code,
                message,
                reregister,
            } => {
                warn!(code, message = %message, reregister, "Scheduler reported an error");
                if reregister {
                    send(sink, &WorkerMessage::register(self.spec.clone())).await?;
                }
            }
        }
        Ok(())
    }

    fn start_job(&mut self, order: DispatchOrder) {
        if self.jobs.contains(&order.job_id) {
            warn!(job_id = %order.job_id, "Job already running, ignoring duplicate dispatch");
            return;
        }
        info!(job_id = %order.job_id, limits = %order.limits, "Running job");

        let job_id = order.job_id.clone();
        let limits = order.limits;
        let runner = Arc::clone(&self.runner);
        let updates = self.updates_tx.clone();
        let task = tokio::spawn(async move {
            let job_id = order.job_id.clone();
            let _ = updates.send((job_id.clone(), ExecutorReport::Started)).await;
            let report = runner.run(order).await;
            let _ = updates.send((job_id, report)).await;
        });
        self.jobs.start(job_id, limits, task.abort_handle());
    }
}

async fn send(sink: &mut WsSink, msg: &WorkerMessage) -> WorkerResult<()> {
    sink.send(Message::Text(msg.to_json()?)).await?;
    Ok(())
}

async fn await_registered(source: &mut WsSource) -> WorkerResult<u64> {
    while let Some(msg) = source.next().await {
        let text = match msg? {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        match SchedulerMessage::from_json(&text)? {
            SchedulerMessage::Registered {
                heartbeat_interval_secs,
                ..
            } => return Ok(heartbeat_interval_secs),
            SchedulerMessage::Error { code, message, .. }
                if code == error_codes::INVALID_SPEC || code == error_codes::PROTOCOL_MISMATCH =>
            {
                return Err(WorkerError::Registration { code, message });
            }
            other => debug!(message = ?other, "Ignoring message before registration"),
        }
    }
    Err(WorkerError::Connection("connection closed during registration".into()))
}
