// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};

use crate::types::{PackageList, parse_duration};

/// Command-line arguments for `cmdwarden`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "cmdwarden",
    version,
    about = "Launch, supervise and terminate command processes on a worker node.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML). A missing file means defaults.
    #[arg(long, global = true, value_name = "PATH", default_value = "Cmdwarden.toml")]
    pub config: PathBuf,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `CMDWARDEN_LOG` or a default level will be used.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run one command under supervision until it exits.
    ///
    /// Ctrl-C stops it (SIGTERM, then SIGKILL after the grace period).
    Run {
        /// Pid-file to write; relative paths land in `[supervisor].pid_dir`.
        #[arg(long, value_name = "PATH")]
        pid_file: PathBuf,

        /// File receiving the command's stdout and stderr (appended).
        #[arg(long, value_name = "PATH")]
        log: PathBuf,

        /// Environment override, repeatable.
        #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_env_pair)]
        env: Vec<(String, String)>,

        /// Whitespace-separated packages to resolve; selects a managed launch.
        #[arg(long, value_name = "PACKAGES")]
        packages: Option<String>,

        /// Deadline for shutdown after Ctrl-C.
        #[arg(long, value_name = "DURATION", default_value = "10s", value_parser = parse_duration)]
        stop_timeout: Duration,

        /// Program and arguments.
        #[arg(last = true, required = true, value_name = "ARGS")]
        args: Vec<String>,
    },

    /// Stop a command recorded in a pid-file and remove the pid-file.
    Stop {
        #[arg(long, value_name = "PATH")]
        pid_file: PathBuf,

        #[arg(long, value_name = "DURATION", default_value = "10s", value_parser = parse_duration)]
        timeout: Duration,
    },

    /// Report whether the command behind a pid-file is still running.
    Status {
        #[arg(long, value_name = "PATH")]
        pid_file: PathBuf,
    },

    /// Parse + validate the config and print a summary; runs nothing.
    Check,
}

impl Command {
    /// Package list requested by `run`, if any.
    pub fn packages(&self) -> Option<PackageList> {
        match self {
            Command::Run {
                packages: Some(p), ..
            } => Some(PackageList::parse(p)),
            _ => None,
        }
    }
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

/// Resolve a pid-file argument against the configured pid directory.
pub fn resolve_pid_file(pid_dir: &Path, pid_file: &Path) -> PathBuf {
    if pid_file.is_absolute() {
        pid_file.to_path_buf()
    } else {
        pid_dir.join(pid_file)
    }
}

fn parse_env_pair(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{s}'")),
    }
}
