//! TGP scheduler daemon.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tgp_server::{SchedulerServer, ServerConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Economic scheduler daemon.
#[derive(Debug, Parser)]
#[command(name = "tgp-server", version, about)]
struct Args {
    /// Address to listen on; overrides the config file.
    #[arg(long, env = "TGP_BIND")]
    bind: Option<SocketAddr>,

    /// TOML configuration file.
    #[arg(long, env = "TGP_CONFIG")]
    config: Option<PathBuf>,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format);

    let mut config = match &args.config {
        Some(path) => ServerConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => ServerConfig::default(),
    };
    if let Some(bind) = args.bind {
        config = config.with_bind_addr(bind);
    }
    config.validate().context("invalid configuration")?;

    info!("Starting TGP scheduler on {}", config.bind_addr);
    info!("  Workers connect via: TGP_SCHEDULER_URL=ws://{}/", config.bind_addr);

    let mut server = SchedulerServer::new(config);
    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown.send(()).await;
        }
    });

    server.serve().await.context("scheduler server failed")
}
