//! Background liveness task.
//!
//! Runs [`SchedulerService::run_maintenance`] on a fixed interval until
//! stopped. It only takes the same short locks as any other caller, so
//! submissions never wait on it for long.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::service::SchedulerService;

/// Handle to the running liveness task.
#[derive(Debug)]
pub struct LivenessMonitor {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

impl LivenessMonitor {
    /// Spawn the task with the interval from the service config.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn start(service: Arc<SchedulerService>) -> Self {
        let interval = service.config().monitor_interval;
        Self::start_with_interval(service, interval)
    }

    /// Spawn the task with an explicit interval.
    #[must_use]
    pub fn start_with_interval(service: Arc<SchedulerService>, interval: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        info!(interval_ms = interval.as_millis(), "Starting liveness monitor");
        let handle = tokio::spawn(run_loop(service, interval, shutdown_rx));
        Self {
            handle,
            shutdown_tx,
        }
    }

    /// Whether the task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop the task and wait for it to exit.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.handle.await;
        info!("Liveness monitor stopped");
    }
}

async fn run_loop(
    service: Arc<SchedulerService>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let report = service.run_maintenance();
                if !report.is_empty() {
                    debug!(?report, "Liveness pass changed state");
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}
