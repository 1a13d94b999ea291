//! BuildLoop CLI entry point
//!
//! Inspection and maintenance of a project's task graph, session ledger and
//! checkpoint export.

use std::fs;
use std::path::Path;

use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use tracing::{debug, info};

use buildloop::checkpoint::{self, CheckpointError};
use buildloop::cli::{CheckpointCommand, Cli, Command, OutputFormat, get_log_path};
use buildloop::config::Config;
use buildloop::state::StateManager;
use taskgraph::{Item, ItemStatus};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let log_path = get_log_path();
    if let Some(log_dir) = log_path.parent() {
        fs::create_dir_all(log_dir).context("Failed to create log directory")?;
    }

    // Priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(&log_path).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    if let Some(db) = &cli.db {
        config.storage.db_path = db.clone();
    }
    if let Some(project) = &cli.project {
        config.storage.project = project.clone();
    }

    setup_logging(cli.log_level.as_deref(), config.log_level.as_deref()).context("Failed to setup logging")?;
    config.validate().context("Invalid configuration")?;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Status => {
            let state = open_state(&config)?;
            cmd_status(&state, cli.format).await
        }
        Command::Tasks { epic, ready, incomplete } => {
            let state = open_state(&config)?;
            cmd_tasks(&state, epic.as_deref(), ready, incomplete, cli.format).await
        }
        Command::SetStatus { id, status } => {
            let state = open_state(&config)?;
            cmd_set_status(&state, &id, &status).await
        }
        Command::Reopen { id } => {
            let state = open_state(&config)?;
            state
                .reopen(&id)
                .await
                .context(format!("Failed to reopen {}", id))?;
            println!("{} {} is open", "✓".green(), id.cyan());
            Ok(())
        }
        Command::Sessions { doc } => {
            let state = open_state(&config)?;
            cmd_sessions(&state, &doc, cli.format).await
        }
        Command::Checkpoint { command } => match command {
            CheckpointCommand::Show { path } => {
                cmd_checkpoint_show(path.as_deref().unwrap_or(&config.storage.checkpoint_path), cli.format)
            }
            CheckpointCommand::Clear { path } => {
                let path = path.unwrap_or_else(|| config.storage.checkpoint_path.clone());
                checkpoint::delete(&path).context("Failed to clear checkpoint")?;
                println!("{} Checkpoint cleared: {}", "✓".green(), path.display());
                Ok(())
            }
        },
    }
}

fn open_state(config: &Config) -> Result<StateManager> {
    debug!(db_path = %config.storage.db_path.display(), project = %config.storage.project, "open_state: called");
    StateManager::open(&config.storage.db_path, &config.storage.project)
}

fn colored_status(status: ItemStatus) -> ColoredString {
    match status {
        ItemStatus::Open => status.as_str().normal(),
        ItemStatus::InProgress => status.as_str().yellow(),
        ItemStatus::Done => status.as_str().green(),
        ItemStatus::Blocked => status.as_str().red(),
        ItemStatus::Canceled => status.as_str().dimmed(),
    }
}

async fn cmd_status(state: &StateManager, format: OutputFormat) -> Result<()> {
    debug!(%format, "cmd_status: called");
    let epics = state.active_epics().await?;

    let mut rows = Vec::with_capacity(epics.len());
    for epic in epics {
        let (completed, total) = state.compute_epic_progress(&epic.id).await?;
        rows.push((epic, completed, total));
    }

    match format {
        OutputFormat::Json => {
            let json: Vec<_> = rows
                .iter()
                .map(|(epic, completed, total)| {
                    serde_json::json!({ "epic": epic, "completed": completed, "total": total })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Text => {
            if rows.is_empty() {
                println!("No active epics");
            }
            for (epic, completed, total) in rows {
                println!(
                    "{} [{}] {} ({}/{})",
                    epic.id.cyan(),
                    colored_status(epic.status),
                    epic.title.bold(),
                    completed,
                    total
                );
            }
        }
    }
    Ok(())
}

async fn cmd_tasks(
    state: &StateManager,
    epic: Option<&str>,
    ready: bool,
    incomplete: bool,
    format: OutputFormat,
) -> Result<()> {
    debug!(?epic, ready, incomplete, %format, "cmd_tasks: called");
    let tasks = match (epic, ready, incomplete) {
        (_, true, _) => state.ready_tasks(epic).await?,
        (_, _, true) | (None, false, false) => state.incomplete_tasks(epic).await?,
        (Some(epic_id), false, false) => state.list_tasks(epic_id).await?,
    };
    print_items(&tasks, format)
}

fn print_items(items: &[Item], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(items)?),
        OutputFormat::Text => {
            if items.is_empty() {
                println!("No tasks");
            }
            for item in items {
                println!(
                    "{} [{}] p{} {}",
                    item.id.cyan(),
                    colored_status(item.status),
                    item.priority,
                    item.title
                );
            }
        }
    }
    Ok(())
}

async fn cmd_set_status(state: &StateManager, id: &str, status: &str) -> Result<()> {
    debug!(%id, %status, "cmd_set_status: called");
    let status: ItemStatus = status.parse()?;
    state
        .update_status(id, status)
        .await
        .context(format!("Failed to set {} to {}", id, status))?;
    println!("{} {} is {}", "✓".green(), id.cyan(), colored_status(status));
    Ok(())
}

async fn cmd_sessions(state: &StateManager, doc: &Path, format: OutputFormat) -> Result<()> {
    debug!(doc = %doc.display(), %format, "cmd_sessions: called");
    let session = state.latest_active_session(&doc.to_string_lossy()).await?;

    match (format, session) {
        (OutputFormat::Json, session) => println!("{}", serde_json::to_string_pretty(&session)?),
        (OutputFormat::Text, None) => println!("No resumable session for {}", doc.display()),
        (OutputFormat::Text, Some(s)) => {
            println!("{} [{}]", s.id.cyan(), s.status.to_string().yellow());
            println!("  document:   {}", s.arch_doc);
            println!("  iteration:  {}", s.iteration);
            println!("  total cost: {:.2}", s.total_cost);
            if let Some(cp) = &s.checkpoint_path {
                println!("  checkpoint: {}", cp);
            }
            println!("  updated:    {}", s.updated_at.to_rfc3339().dimmed());
        }
    }
    Ok(())
}

fn cmd_checkpoint_show(path: &Path, format: OutputFormat) -> Result<()> {
    debug!(path = %path.display(), %format, "cmd_checkpoint_show: called");
    let cp = match checkpoint::load(path) {
        Ok(cp) => cp,
        Err(CheckpointError::NotFound(_)) => {
            println!("No checkpoint at {}", path.display());
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&cp)?),
        OutputFormat::Text => {
            println!("{} {}", "Checkpoint".bold(), path.display());
            println!("  iteration:       {}", cp.iteration);
            println!("  completed tasks: {}", cp.completed_tasks.len());
            println!("  pending gaps:    {}", cp.pending_gaps.len());
            for gap in &cp.pending_gaps {
                println!("    {} [{}] {}", gap.feature_id.cyan(), gap.status, gap.description);
            }
            for (question, answer) in &cp.answers {
                println!("  {} {}", format!("{}:", question).dimmed(), answer);
            }
        }
    }
    Ok(())
}
