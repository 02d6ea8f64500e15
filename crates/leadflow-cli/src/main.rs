mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use commands::{AuditArgs, EventArgs, LeadCommand, ReminderCommand, TargetArgs, TransitionArgs};
use leadflow_engine::{
    automation_channel, spawn_automation_worker, AutomationTriggerEngine, EngineConfig,
    LifecycleError, LifecycleOrchestrator,
};
use leadflow_storage::{shared, LeadStore};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_DB_PATH: &str = ".leadflow/leadflow.db";

#[derive(Parser)]
#[command(name = "leadflow")]
#[command(about = "Lead lifecycle engine", long_about = None)]
struct Cli {
    /// SQLite database file (falls back to LEADFLOW_DB_PATH)
    #[arg(long, global = true, default_value = "")]
    db: String,
    /// Actor id recorded on audit events (falls back to LEADFLOW_ACTOR)
    #[arg(long, global = true, default_value = "")]
    actor: String,
    #[arg(long, global = true, default_value_t = false)]
    debug: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Manage leads
    Lead {
        #[command(subcommand)]
        action: LeadCommand,
    },
    /// Move a lead to its next valid stage
    Advance(TargetArgs),
    /// Move a lead to an explicit stage
    Transition(TransitionArgs),
    /// Report qualification completeness
    Check(TargetArgs),
    /// Suggest the next stage for a lead
    Recommend(TargetArgs),
    /// Feed an automation event (VIDEO_SENT, NO_SHOW)
    Event(EventArgs),
    /// Query the audit log
    Audit(AuditArgs),
    /// List or complete reminders
    Reminders {
        #[command(subcommand)]
        action: ReminderCommand,
    },
    /// Print the stage catalog
    Stages,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    if let Commands::Stages = cli.command {
        return commands::print_json(&commands::stage_catalog());
    }

    let db_path = resolve_db_path(&cli.db);
    let store = open_store(&db_path)?;
    let store = shared(store);
    debug!(event = "store_opened", path = %db_path.display());

    let (dispatcher, inbox) = automation_channel();
    let engine = AutomationTriggerEngine::new(store.clone());
    let worker = spawn_automation_worker(engine.clone(), inbox);

    let mut orchestrator =
        LifecycleOrchestrator::new(store, EngineConfig::default()).with_automation(dispatcher);
    if let Some(actor) = resolve_actor(&cli.actor) {
        orchestrator = orchestrator.with_actor(actor);
    }

    let outcome = match cli.command {
        Commands::Lead { action } => commands::handle_lead_command(&orchestrator, action),
        Commands::Advance(args) => commands::advance(&orchestrator, &args),
        Commands::Transition(args) => commands::transition(&orchestrator, &args),
        Commands::Check(args) => commands::check(&orchestrator, &args),
        Commands::Recommend(args) => commands::recommend(&orchestrator, &args),
        Commands::Event(args) => commands::event(&engine, &args),
        Commands::Audit(args) => commands::audit(&orchestrator, &args),
        Commands::Reminders { action } => {
            commands::handle_reminder_command(&orchestrator, action)
        }
        Commands::Stages => Ok(commands::stage_catalog()),
    };

    // Queued automation must land before the process exits.
    drop(orchestrator);
    drop(engine);
    let stats = worker.await.context("automation worker stopped unexpectedly")?;
    if stats.requests > 0 {
        info!(
            event = "automation_drained",
            requests = stats.requests,
            scheduled = stats.scheduled,
            failed = stats.failed
        );
    }

    match outcome {
        Ok(value) => commands::print_json(&value),
        Err(err) => match err.downcast_ref::<LifecycleError>() {
            Some(lifecycle) => {
                commands::print_json(&commands::lifecycle_error_json(lifecycle))?;
                std::process::exit(2);
            }
            None => Err(err),
        },
    }
}

fn open_store(path: &Path) -> Result<LeadStore> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    LeadStore::open(path).with_context(|| format!("Failed to open {}", path.display()))
}

fn init_logging(debug: bool) {
    let level = if debug {
        "debug".to_string()
    } else if let Ok(level) = std::env::var("LEADFLOW_LOG_LEVEL") {
        level
    } else {
        "info".to_string()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn resolve_db_path(db_flag: &str) -> PathBuf {
    if !db_flag.trim().is_empty() {
        return PathBuf::from(db_flag);
    }
    if let Ok(value) = std::env::var("LEADFLOW_DB_PATH") {
        if !value.trim().is_empty() {
            return PathBuf::from(value);
        }
    }
    PathBuf::from(DEFAULT_DB_PATH)
}

fn resolve_actor(actor_flag: &str) -> Option<String> {
    if !actor_flag.trim().is_empty() {
        return Some(actor_flag.trim().to_string());
    }
    match std::env::var("LEADFLOW_ACTOR") {
        Ok(value) if !value.trim().is_empty() => Some(value.trim().to_string()),
        _ => None,
    }
}
