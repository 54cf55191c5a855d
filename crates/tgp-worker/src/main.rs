//! tgp-worker: runs jobs for the TGP scheduler on this host.

use anyhow::Context;
use clap::Parser;
use tgp_worker::{ContainerExecutor, HostInfo, WorkerAgent, WorkerArgs, WorkerConfig, node_spec};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = WorkerArgs::parse();
    let config = WorkerConfig::from_args(&args).context("invalid worker configuration")?;
    let host = HostInfo::detect().context("detecting host resources")?;
    let spec = node_spec(&config, &host).context("building node spec")?;

    info!(
        node_id = %spec.id,
        capacity = %spec.capacity,
        price = spec.price_per_hour_usd,
        scheduler = %config.scheduler_url,
        "Starting worker"
    );

    let executor = ContainerExecutor::new(config.runtime, config.output_tail_lines);
    let mut agent = WorkerAgent::new(config, spec, executor);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(true);
        }
    });

    agent.run(shutdown_rx).await.context("worker stopped")
}
