// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `daqsched`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "daqsched",
    version,
    about = "Run a graph of dependent shell commands on a worker pool.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Daqsched.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "Daqsched.toml")]
    pub config: String,

    /// Number of worker threads (overrides `[scheduler].workers`; 0 = hardware
    /// concurrency).
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,

    /// Drive a main loop on this thread for tasks with `affinity = "main_loop"`.
    #[arg(long)]
    pub main_loop: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `DAQSCHED_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the task graph as DOT, but don't execute
    /// any commands.
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
