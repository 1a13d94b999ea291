//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

/// BuildLoop - inspect and maintain a build-to-spec task graph
#[derive(Parser)]
#[command(
    name = "bl",
    about = "Inspect and maintain the task graph of a build-to-spec loop",
    version = env!("CARGO_PKG_VERSION"),
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Override storage.db-path
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Override storage.project
    #[arg(short, long, global = true)]
    pub project: Option<String>,

    /// Output format
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show open and in-progress epics with derived progress
    Status,

    /// List tasks (incomplete tasks of the project when no filter is given)
    Tasks {
        /// Restrict to the children of this epic
        #[arg(short, long)]
        epic: Option<String>,

        /// Only open tasks whose dependencies are all done
        #[arg(long, conflicts_with = "incomplete")]
        ready: bool,

        /// Only tasks that are neither done nor canceled
        #[arg(long)]
        incomplete: bool,
    },

    /// Set an item's status (open, in_progress, done, blocked, canceled)
    SetStatus {
        /// Item ID
        id: String,

        /// New status
        status: String,
    },

    /// Force an item back to open
    Reopen {
        /// Item ID
        id: String,
    },

    /// Show the latest resumable session for a document
    Sessions {
        /// Architecture document the session was started with
        doc: PathBuf,
    },

    /// Inspect or remove the checkpoint export
    Checkpoint {
        #[command(subcommand)]
        command: CheckpointCommand,
    },
}

/// Checkpoint subcommands
#[derive(Debug, Subcommand)]
pub enum CheckpointCommand {
    /// Print the checkpoint contents
    Show {
        /// Checkpoint file (defaults to storage.checkpoint-path)
        path: Option<PathBuf>,
    },

    /// Delete the checkpoint; a missing file is fine
    Clear {
        /// Checkpoint file (defaults to storage.checkpoint-path)
        path: Option<PathBuf>,
    },
}

/// Output format for inspection commands
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "OutputFormat::from_str: called");
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use: text or json", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Path of the log file written by `bl`
pub fn get_log_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("buildloop")
        .join("logs")
        .join("buildloop.log")
}
