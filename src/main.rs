//! # CareDesk Daemon
//!
//! Runs the recurring-task executor against the SQLite stores, with the
//! session generation handler registered. Schedules can be created from the
//! CLI; their first session batch materializes synchronously and the rest is
//! picked up by the background loop.
//!
//! Usage:
//!   caredesk                                  # Run the scheduler daemon
//!   caredesk create-schedule --rule "DTSTART=20260901T060000Z;FREQ=DAILY;INTERVAL=1" \
//!       --capacity 8 --organization org-main  # Create + activate a schedule

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use caredesk_booking::{
    BookingDb, Schedule, ScheduleOrchestrator, ScheduleStore, SessionGenerationHandler,
    SessionStore, SESSION_GENERATION_HANDLER,
};
use caredesk_core::CareDeskConfig;
use caredesk_scheduler::{ExecutorConfig, HandlerRegistry, SchedulerDb, TaskExecutor, TaskStore};

#[derive(Parser)]
#[command(name = "caredesk", version, about = "🏥 CareDesk — clinic scheduling core")]
struct Cli {
    /// Config file path (default: ~/.caredesk/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// SQLite database path (overrides config)
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler daemon (default)
    Run,
    /// Create and activate a schedule; the first session batch is generated
    /// immediately, the rest continues under the daemon
    CreateSchedule {
        /// Recurrence expression, e.g. "DTSTART=20260901T060000Z;FREQ=DAILY;INTERVAL=1"
        #[arg(long)]
        rule: String,

        /// Booking capacity per session
        #[arg(long, default_value = "1")]
        capacity: u32,

        /// Owning organization id
        #[arg(long)]
        organization: String,

        /// Responsible professional id
        #[arg(long)]
        professional: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let config = match &cli.config {
        Some(path) => CareDeskConfig::load_from(path)?,
        None => CareDeskConfig::load()?,
    };

    let db_path = cli
        .db_path
        .clone()
        .unwrap_or_else(|| config.storage.resolved_db_path());
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tasks: Arc<SchedulerDb> = Arc::new(SchedulerDb::open(&db_path)?);
    let booking: Arc<BookingDb> = Arc::new(BookingDb::open(&db_path)?);
    let schedules: Arc<dyn ScheduleStore> = booking.clone();
    let sessions: Arc<dyn SessionStore> = booking.clone();

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            let mut registry = HandlerRegistry::new();
            registry.register(
                SESSION_GENERATION_HANDLER,
                Arc::new(
                    SessionGenerationHandler::new(schedules, sessions)
                        .with_sliding_range(config.scheduler.sliding_range_days),
                ),
            );

            let executor = TaskExecutor::new(
                tasks.clone() as Arc<dyn TaskStore>,
                Arc::new(registry),
                ExecutorConfig::from(&config.scheduler),
            );
            let handle = executor.spawn();

            tracing::info!("CareDesk daemon running, db at {}", db_path.display());
            tokio::signal::ctrl_c().await?;
            tracing::info!("Shutdown requested, draining executor ...");
            handle.stop().await;
        }
        Command::CreateSchedule { rule, capacity, organization, professional } => {
            let orchestrator = ScheduleOrchestrator::new(
                schedules,
                sessions.clone(),
                tasks as Arc<dyn TaskStore>,
            )
            .with_sliding_range(config.scheduler.sliding_range_days);

            let mut schedule = Schedule::new(&rule, capacity, &organization).activated();
            if let Some(professional) = &professional {
                schedule = schedule.owned_by(professional);
            }

            let saved = orchestrator.create(schedule, professional.as_deref())?;
            let generated = sessions.list_for_schedule(&saved.id)?;
            println!("📅 Schedule {} created ({:?})", saved.id, saved.cycle);
            println!("   {} sessions materialized", generated.len());
            match saved.task_id {
                Some(task_id) => {
                    println!("   driving task {task_id} continues generation under the daemon")
                }
                None => println!("   nothing deferred, no driving task needed"),
            }
        }
    }

    Ok(())
}
