//! Backup Engine - command-line runner
//!
//! Loads configuration, initializes logging and drives the orchestrator.

use anyhow::{bail, Context, Result};
use backup_engine::{utils, BackupOrchestrator, BackupType, Config, JobId};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register a new backup job
    Create {
        name: String,
        /// full or differential
        #[arg(short = 't', long = "type", default_value = "full")]
        backup_type: BackupType,
        source: PathBuf,
        dest: PathBuf,
    },
    /// List jobs and their last known state
    List,
    /// Delete a job by name
    Remove { name: String },
    /// Run one or more jobs by name, concurrently
    Run {
        #[arg(required = true)]
        names: Vec<String>,
        /// Password handed to the encryption helper (defaults to $BACKUP_ENGINE_PASSWORD)
        #[arg(long)]
        password: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => Config::default(),
    };

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    tracing::info!("Starting backup-engine v{}", env!("CARGO_PKG_VERSION"));

    let orchestrator = std::sync::Arc::new(BackupOrchestrator::open(config).await?);

    match args.command {
        Command::Create {
            name,
            backup_type,
            source,
            dest,
        } => {
            let job = orchestrator.create_job(&name, backup_type, source, dest).await?;
            println!("{}\t{}", job.id, job.name);
        }
        Command::List => {
            let states = orchestrator.state().snapshot().await;
            for job in orchestrator.jobs().await {
                let state = states
                    .iter()
                    .find(|s| s.job_name == job.name)
                    .map(|s| format!("{:?}", s.state))
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{}\t{}\t{}\t{}\t{} -> {}",
                    job.id,
                    job.name,
                    job.backup_type,
                    state,
                    job.source_root.display(),
                    job.dest_root.display()
                );
            }
        }
        Command::Remove { name } => {
            let job = match orchestrator.find_job(&name).await {
                Some(job) => job,
                None => bail!("no job named '{}'", name),
            };
            orchestrator.remove_job(job.id).await?;
        }
        Command::Run { names, password } => {
            let password = password
                .or_else(|| std::env::var("BACKUP_ENGINE_PASSWORD").ok())
                .unwrap_or_default();
            let mut ids: Vec<(String, JobId)> = Vec::new();
            for name in names {
                match orchestrator.find_job(&name).await {
                    Some(job) => ids.push((name, job.id)),
                    None => bail!("no job named '{}'", name),
                }
            }

            let mut handles = Vec::new();
            for (name, id) in ids {
                let orchestrator = std::sync::Arc::clone(&orchestrator);
                let password = password.clone();
                handles.push(tokio::spawn(async move {
                    (name, orchestrator.launch_job(id, &password).await)
                }));
            }

            let mut failed = 0;
            for handle in handles {
                let (name, result) = handle.await?;
                match result {
                    Ok(report) => println!("{}: {}", name, serde_json::to_string(&report)?),
                    Err(e) => {
                        eprintln!("{}: {}", name, e);
                        failed += 1;
                    }
                }
            }
            if failed > 0 {
                bail!("{} job(s) failed", failed);
            }
        }
    }

    Ok(())
}
