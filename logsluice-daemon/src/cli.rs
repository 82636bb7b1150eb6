//! CLI argument definitions for logsluice-daemon.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use logsluice_core::config::LogsluiceConfig;

/// logsluice log ingestion daemon.
///
/// Drains the durable log queue into the store and evaluates
/// threshold alert rules against persisted records.
#[derive(Parser, Debug)]
#[command(name = "logsluice-daemon")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to logsluice.toml configuration file.
    #[arg(short, long, default_value = "/etc/logsluice/logsluice.toml")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_format: Option<String>,

    /// Validate configuration file and exit without starting the daemon.
    #[arg(long)]
    pub validate: bool,

    /// Override PID file path (takes precedence over config file).
    #[arg(long)]
    pub pid_file: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Daemon subcommands. `run` is the default.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Start the batch worker and alert evaluator.
    Run,
    /// Submit a JSON or NDJSON file through the ingest gateway.
    Ingest {
        /// File containing a JSON array, a single JSON object, or NDJSON lines.
        file: PathBuf,
    },
    /// Print dead-letter entries as JSON lines.
    DeadLetters {
        /// Maximum number of entries to print.
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },
}

impl DaemonCli {
    /// The subcommand to execute, defaulting to `run`.
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Run)
    }

    /// Apply command-line overrides on top of file and environment settings.
    pub fn apply_overrides(&self, config: &mut LogsluiceConfig) {
        if let Some(level) = &self.log_level {
            config.general.log_level = level.clone();
        }
        if let Some(format) = &self.log_format {
            config.general.log_format = format.clone();
        }
        if let Some(pid_file) = &self.pid_file {
            config.general.pid_file = pid_file.clone();
        }
    }
}
