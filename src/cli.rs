// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, Subcommand, ValueEnum};

/// Command-line arguments for `action-queue`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "action-queue",
    version,
    about = "Inspect and validate persisted action programs.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `ActionQueue.toml` in the current working directory. A missing
    /// file means every setting takes its default.
    #[arg(long, value_name = "PATH", default_value = "ActionQueue.toml")]
    pub config: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `ACTION_QUEUE_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// List stored programs with their status and next execution time.
    List,

    /// Print the display tree of one program.
    Show {
        #[arg(value_name = "PROGRAM_ID")]
        program_id: String,
    },

    /// Check an operation tree stored as JSON.
    Validate {
        #[arg(value_name = "PATH")]
        path: String,
    },
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
