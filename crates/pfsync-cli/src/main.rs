//! pfsync: keep a local task list in sync through a shared directory.
//!
//! Uses pfsync-core for the sync engine; the remote is any directory both
//! machines can reach (a mounted share, a synced folder).

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use pfsync_cli::{App, inspect_blob};
use pfsync_core::{ConflictResolution, SyncEvent, SyncOutcome, validate_builtin_registry};
use std::path::PathBuf;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "pfsync")]
#[command(about = "Local-first task list with directory sync")]
struct Args {
    /// Directory holding the local log and sync metadata
    #[arg(short, long, default_value = ".pfsync")]
    state_dir: PathBuf,

    /// Remote directory (overrides the configured one)
    #[arg(short, long)]
    remote: Option<PathBuf>,

    /// Passphrase for encrypted sync files
    #[arg(long, env = "PFSYNC_PASSPHRASE", hide_env_values = true)]
    passphrase: Option<String>,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the state directory and remember the remote
    Init,
    /// Add a task
    AddTask {
        title: String,
        #[arg(long)]
        project: Option<String>,
    },
    /// Mark a task done (id or unique id prefix)
    Complete { id: String },
    /// Change a task's title
    Rename { id: String, title: String },
    /// Print the materialized task list
    Show,
    /// Print sync status
    Status,
    /// Run one sync cycle
    Sync,
    /// Resolve the pending conflict
    Resolve { side: Side },
    /// Describe a sync file
    Inspect { file: PathBuf },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Side {
    Local,
    Remote,
}

fn print_outcome(outcome: &SyncOutcome) {
    match outcome {
        SyncOutcome::UpToDate => println!("Already up to date"),
        SyncOutcome::Pulled { operations } => {
            println!("Pulled remote history ({} operations)", operations)
        }
        SyncOutcome::Pushed {
            revision,
            operations,
        } => println!("Pushed revision {} ({} operations)", revision, operations),
        SyncOutcome::Conflict(conflict) => {
            println!("Conflict detected. Run `pfsync resolve local` or `pfsync resolve remote`.");
            print!("{}", conflict);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,pfsync_core=debug,pfsync_cli=debug"
    } else {
        "warn,pfsync_core=info,pfsync_cli=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let registry = validate_builtin_registry().context("Built-in migration registry is broken")?;
    debug!(
        "Schema v{} (reads back to v{})",
        registry.current_version(),
        registry.min_supported_version()
    );

    if let Command::Inspect { file } = &args.command {
        let blob = std::fs::read(file).with_context(|| format!("Failed to read {:?}", file))?;
        print!("{}", inspect_blob(&blob, args.passphrase.as_deref())?);
        return Ok(());
    }

    let mut app = App::open(&args.state_dir, args.remote.clone(), args.passphrase.clone())?;
    let _subscription = app.subscribe(|event| match event {
        SyncEvent::StateChanged { state, .. } => debug!("Sync state: {}", state),
        SyncEvent::OperationSkipped { op_id, reason, .. } => {
            warn!("Skipped operation {}: {}", op_id, reason)
        }
        SyncEvent::Migrated {
            from_version,
            to_version,
            operations,
            ..
        } => info!(
            "Migrated remote data from v{} to v{} ({} operations)",
            from_version, to_version, operations
        ),
        SyncEvent::ConflictDetected { fields, .. } => {
            warn!("Conflicting fields: {}", fields.join(", "))
        }
        SyncEvent::Uploaded { revision, .. } => debug!("Uploaded revision {}", revision),
    });

    match args.command {
        Command::Init => {
            if let Some(remote) = args.remote {
                app.set_remote_dir(remote)?;
            }
            println!("Initialized {:?} as client {}", args.state_dir, app.client_id());
        }
        Command::AddTask { title, project } => {
            let id = app.add_task(&title, project)?;
            println!("{}", id);
        }
        Command::Complete { id } => {
            let id = app.complete(&id)?;
            println!("Completed {}", id);
        }
        Command::Rename { id, title } => {
            let id = app.rename(&id, &title)?;
            println!("Renamed {}", id);
        }
        Command::Show => {
            let state = app.state()?;
            if state.tasks.is_empty() {
                println!("No tasks");
            }
            for task in state.tasks.values() {
                let mark = if task.is_done { "x" } else { " " };
                let short_id: String = task.id.chars().take(8).collect();
                match &task.project_id {
                    Some(project) => {
                        println!("[{}] {} {} ({})", mark, short_id, task.title, project)
                    }
                    None => println!("[{}] {} {}", mark, short_id, task.title),
                }
            }
        }
        Command::Status => print!("{}", app.status()?),
        Command::Sync => print_outcome(&app.sync().await?),
        Command::Resolve { side } => {
            let resolution = match side {
                Side::Local => ConflictResolution::KeepLocal,
                Side::Remote => ConflictResolution::KeepRemote,
            };
            print_outcome(&app.resolve(resolution).await?);
        }
        Command::Inspect { .. } => {}
    }

    Ok(())
}
