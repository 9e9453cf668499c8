//! # sitesync Main Entry Point
//!
//! `serve` hosts the agent and operator endpoints; the `job` subcommands
//! drive the persisted job from the command line, one tick per invocation
//! or until it finishes.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use sitesync::{
    config::{AppConfig, ConfigLoader},
    db::{health_check, init_pool},
    handlers::jobs::JobInfo,
    migration::{Migrator, MigratorTrait},
    models::{Job, JobStatus},
    remote::RemoteClient,
    server::{AppState, run_server},
    telemetry::init_tracing,
};

#[derive(Debug, Parser)]
#[command(name = "sitesync", version, about = "Two-site database and media synchronization")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the remote agent and operator endpoints
    Serve,
    /// Apply the state table migrations
    Migrate,
    /// Manage the current synchronization job
    #[command(subcommand)]
    Job(JobCommand),
}

#[derive(Debug, Subcommand)]
enum JobCommand {
    /// Create a job for a replication set, replacing the current one
    Create(CreateArgs),
    /// Run the step under the cursor
    Tick,
    /// Tick until the job stops running
    Run {
        /// Give up after this many ticks
        #[arg(long, default_value_t = 10_000)]
        max_ticks: usize,
    },
    /// Stop the job and lift maintenance mode on the affected side
    Stop,
    /// Print the current job
    Status,
}

#[derive(Debug, Args)]
struct CreateArgs {
    /// Replication set id
    #[arg(long = "set")]
    set_name: String,
    /// Exports and downloads only; neither site is modified
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::new().load()?;
    init_tracing(&config)?;
    if let Ok(redacted_json) = config.redacted_json() {
        tracing::debug!(config = %redacted_json, "Loaded configuration");
    }
    tracing::info!(profile = %config.profile, "Loaded configuration");

    match cli.command {
        Command::Serve => {
            let db = init_pool(&config).await?;
            health_check(&db)
                .await
                .context("Database is not reachable")?;
            Migrator::up(&db, None)
                .await
                .context("Failed to apply migrations")?;
            run_server(config, db).await
        }
        Command::Migrate => {
            let db = init_pool(&config).await?;
            Migrator::up(&db, None)
                .await
                .context("Failed to apply migrations")?;
            tracing::info!("Migrations applied");
            Ok(())
        }
        Command::Job(command) => run_job_command(config, command).await,
    }
}

async fn run_job_command(config: AppConfig, command: JobCommand) -> Result<()> {
    let db = init_pool(&config).await?;
    let state = AppState::new(config, db)?;

    match command {
        JobCommand::Create(args) => {
            let set = state.config.find_set(&args.set_name)?.clone();
            let remote = RemoteClient::new(state.config.remote.require()?)?;
            let peer = remote
                .status()
                .await
                .context("Remote agent did not answer the status check")?;
            tracing::info!(
                service = %peer.service,
                version = %peer.version,
                maintenance = peer.maintenance,
                "Remote agent is reachable"
            );
            let job = state
                .orchestrator()?
                .create_job(&set, args.dry_run)
                .await?;
            print_job(job)
        }
        JobCommand::Tick => {
            let report = state.orchestrator()?.tick().await?;
            println!("{}", report.message);
            print_job(report.job)
        }
        JobCommand::Run { max_ticks } => {
            let report = state
                .orchestrator()?
                .run_to_completion(max_ticks, |report| {
                    println!("[{:>3}%] {}", report.job.progress, report.message);
                })
                .await?;
            print_job(report.job)
        }
        JobCommand::Stop => {
            let job = state.orchestrator()?.stop_and_compensate().await?;
            print_job(job)
        }
        JobCommand::Status => {
            match state.orchestrator()?.status().await? {
                Some(job) => print_job(job)?,
                None => println!("No job has been created"),
            }
            Ok(())
        }
    }
}

fn print_job(job: Job) -> Result<()> {
    let failed = job.status == JobStatus::Error;
    println!("{}", serde_json::to_string_pretty(&JobInfo::from(job))?);
    if failed {
        anyhow::bail!("job halted with an error");
    }
    Ok(())
}
