// src/cli.rs

//! CLI argument parsing using `clap`.

use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::config::parse_duration;

/// Command-line arguments for `workchain`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "workchain",
    version,
    about = "Run named chains of background work units under constraints.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    #[arg(long, value_name = "PATH", default_value = "Workchain.toml")]
    pub config: String,

    /// Submit only this chain (repeatable). Default: every configured chain.
    #[arg(long = "chain", value_name = "NAME")]
    pub chains: Vec<String>,

    /// Start with the charging signal reported as true.
    #[arg(long)]
    pub charging: bool,

    /// Report charging = true after this delay (e.g. "5s").
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub charge_after: Option<Duration>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `WORKCHAIN_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the chains, but don't run anything.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
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
