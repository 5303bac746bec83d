// src/supervisor/report.rs

//! Upward status reporting towards the dispatcher-facing client.

use std::fmt::{self, Debug};
use std::path::PathBuf;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::process::{ProcessExit, TerminationState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    /// Emitted only after the pid-file exists.
    Launched {
        pid: u32,
        pid_file: PathBuf,
        log_sink: PathBuf,
        managed: bool,
    },
    LaunchFailed {
        program: String,
        error: String,
    },
    Exited {
        pid: u32,
        exit: ProcessExit,
    },
    /// The pid was recycled; the command's fate is unknown.
    Lost {
        pid: u32,
    },
    Terminated {
        pid: u32,
        state: TerminationState,
        /// A forceful signal had to be sent.
        forced: bool,
    },
}

impl SupervisorEvent {
    pub fn pid(&self) -> Option<u32> {
        match self {
            SupervisorEvent::Launched { pid, .. }
            | SupervisorEvent::Exited { pid, .. }
            | SupervisorEvent::Lost { pid }
            | SupervisorEvent::Terminated { pid, .. } => Some(*pid),
            SupervisorEvent::LaunchFailed { .. } => None,
        }
    }
}

impl fmt::Display for SupervisorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SupervisorEvent::Launched { pid, managed, .. } => {
                let how = if *managed { "managed" } else { "direct" };
                write!(f, "launched pid {pid} ({how})")
            }
            SupervisorEvent::LaunchFailed { program, error } => {
                write!(f, "launch of '{program}' failed: {error}")
            }
            SupervisorEvent::Exited { pid, exit } => write!(f, "pid {pid} exited: {exit}"),
            SupervisorEvent::Lost { pid } => write!(f, "pid {pid} lost (reused by another process)"),
            SupervisorEvent::Terminated { pid, state, forced } => {
                write!(f, "pid {pid} terminated: {state}")?;
                if *forced {
                    f.write_str(" (forced)")?;
                }
                Ok(())
            }
        }
    }
}

/// Receives supervisor events. Called synchronously from the supervisor;
/// implementations must not block.
pub trait StatusReporter: Send + Sync + Debug {
    fn report(&self, event: SupervisorEvent);
}

/// Logs every event through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl StatusReporter for TracingReporter {
    fn report(&self, event: SupervisorEvent) {
        match &event {
            SupervisorEvent::LaunchFailed { .. } | SupervisorEvent::Lost { .. } => {
                warn!(pid = ?event.pid(), "{event}")
            }
            _ => info!(pid = ?event.pid(), "{event}"),
        }
    }
}

/// Forwards events to the outer worker loop over a bounded channel.
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    tx: mpsc::Sender<SupervisorEvent>,
}

impl ChannelReporter {
    pub fn new(tx: mpsc::Sender<SupervisorEvent>) -> Self {
        Self { tx }
    }
}

impl StatusReporter for ChannelReporter {
    fn report(&self, event: SupervisorEvent) {
        if let Err(err) = self.tx.try_send(event) {
            let (reason, event) = match err {
                mpsc::error::TrySendError::Full(ev) => ("channel full", ev),
                mpsc::error::TrySendError::Closed(ev) => ("channel closed", ev),
            };
            warn!(reason, %event, "failed to forward supervisor event");
        }
    }
}
