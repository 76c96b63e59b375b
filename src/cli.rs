// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `devorch`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "devorch",
    version,
    about = "Rebuild and redeploy dev resources when their files change.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    #[arg(long, value_name = "PATH", default_value = "Devorch.toml")]
    pub config: String,

    /// Update everything once, no watching; exit when idle.
    #[arg(long)]
    pub once: bool,

    /// Tear down every resource and exit.
    #[arg(long)]
    pub down: bool,

    /// Manually trigger this resource at startup (repeatable).
    #[arg(long = "trigger", value_name = "NAME")]
    pub triggers: Vec<String>,

    /// Override `[config].max_parallel_updates`.
    #[arg(long, value_name = "N")]
    pub max_parallel: Option<usize>,

    /// Cancel in-flight updates on teardown instead of letting them finish.
    #[arg(long)]
    pub cancel_on_teardown: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `DEVORCH_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the resource graph, but don't run anything.
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
