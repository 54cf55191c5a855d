//! `tgp` binary entrypoint.

use std::io;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use tgp_cli::cli::{Cli, Commands};
use tgp_cli::commands::{ClusterCommand, JobCommand, SubmitCommand};
use tgp_cli::{CliError, OutputFormat};

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            e.exit_code()
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let format = OutputFormat::new(cli.format);
    let mut stdout = io::stdout().lock();

    match cli.command {
        Commands::SubmitJob(args) => {
            SubmitCommand::new(&cli.scheduler)
                .execute(&mut stdout, &format, &args)
                .await
        }
        Commands::GetStatus { job_id } => JobCommand::new(&cli.scheduler).status(&mut stdout, &format, &job_id).await,
        Commands::GetCost { job_id } => JobCommand::new(&cli.scheduler).cost(&mut stdout, &format, &job_id).await,
        Commands::ListJobs { state } => {
            JobCommand::new(&cli.scheduler)
                .list(&mut stdout, &format, state.map(Into::into))
                .await
        }
        Commands::ClusterStatus => ClusterCommand::new(&cli.scheduler).status(&mut stdout, &format).await,
        Commands::ListNodes => ClusterCommand::new(&cli.scheduler).nodes(&mut stdout, &format).await,
    }
}
