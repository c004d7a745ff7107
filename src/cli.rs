// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `jobgrid`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "jobgrid",
    version,
    about = "Simulate a grid job queue with task and job dependencies.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the grid plan (TOML).
    ///
    /// Default: `grid.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "grid.toml")]
    pub plan: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `JOBGRID_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse and validate the plan, print it, but don't run any job.
    #[arg(long)]
    pub dry_run: bool,
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
