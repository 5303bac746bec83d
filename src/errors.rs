// src/errors.rs

//! Crate-wide error types.
//!
//! Launch, resource-limit and termination failures each get their own enum so
//! callers can match on the exact cause. [`SupervisorError`] is the umbrella
//! used by the supervisor, the config loader and the CLI.

use std::io;
use std::path::PathBuf;

use nix::errno::Errno;
use thiserror::Error;

use crate::process::CommandProcessHandle;
use crate::types::TerminationSignal;

/// Applying the open-file ceiling failed; the spawn is aborted before exec.
#[derive(Error, Debug)]
pub enum ResourceLimitError {
    #[error("open file ceiling must be >= 1 (got {0})")]
    InvalidCeiling(u64),

    #[error("open file ceiling {ceiling} is above the hard limit {hard}")]
    AboveHardLimit { ceiling: u64, hard: u64 },

    #[error("platform rejected the open file limit call: {0}")]
    Unsupported(#[source] Errno),
}

/// The resolver could not fully solve the requested package list.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("unknown packages: {}", .0.join(", "))]
    UnknownPackages(Vec<String>),

    #[error("dependency cycle involving package '{0}'")]
    Cycle(String),
}

/// A single launch attempt failed. No pid-file is left behind.
#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("log sink {path:?} unavailable: {source}")]
    LogSink {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("spawning '{program}' failed: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    ResourceLimit(#[from] ResourceLimitError),

    #[error("environment resolution failed for [{packages}]: {diagnostics}")]
    Resolution {
        packages: String,
        diagnostics: ResolutionError,
    },

    #[error("writing pid-file {path:?} failed: {source}")]
    PidFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Delivering a termination signal failed for a reason other than the
/// process already being gone.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TerminationError {
    #[error("sending {signal} to pid {pid} failed: {errno}")]
    Signal {
        pid: u32,
        signal: TerminationSignal,
        errno: Errno,
    },
}

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error(transparent)]
    Termination(#[from] TerminationError),

    #[error("pid {pid} now belongs to an unrelated process")]
    LostProcess { pid: u32 },

    #[error("process {} is still running; stop it before retiring", .0.pid())]
    StillRunning(Box<CommandProcessHandle>),

    #[error("invalid pid-file {path:?}: {reason}")]
    InvalidPidFile { path: PathBuf, reason: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, SupervisorError>;
