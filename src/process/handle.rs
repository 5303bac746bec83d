// src/process/handle.rs

//! The supervisor's live reference to one command process.

use std::fmt;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::process::Child;
use tracing::warn;

use super::table::{ProcessIdentity, ProcessProbe, ProcessTable};

/// Where a handle stands in its shutdown.
///
/// Variants are ordered; a handle only ever moves forward and never leaves a
/// terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TerminationState {
    Running,
    SignalRequested,
    ForceKillRequested,
    ConfirmedDead,
    UnknownAssumedDead,
}

impl TerminationState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TerminationState::ConfirmedDead | TerminationState::UnknownAssumedDead
        )
    }

    /// Move towards `next` without regressing or leaving a terminal state.
    pub fn advance(self, next: TerminationState) -> TerminationState {
        if self.is_terminal() {
            self
        } else {
            self.max(next)
        }
    }
}

impl fmt::Display for TerminationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TerminationState::Running => "running",
            TerminationState::SignalRequested => "signal-requested",
            TerminationState::ForceKillRequested => "force-kill-requested",
            TerminationState::ConfirmedDead => "confirmed-dead",
            TerminationState::UnknownAssumedDead => "unknown-assumed-dead",
        };
        f.write_str(s)
    }
}

/// How a command process ended, as far as we could observe.
///
/// Both fields are `None` for adopted processes: only the parent can collect
/// an exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProcessExit {
    code: Option<i32>,
    signal: Option<i32>,
}

impl ProcessExit {
    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn code(&self) -> Option<i32> {
        self.code
    }

    /// Signal that terminated the process, if it was killed.
    pub fn signal(&self) -> Option<i32> {
        self.signal
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Exit code a POSIX shell would report for this outcome.
    pub fn shell_code(&self) -> i32 {
        match (self.code, self.signal) {
            (Some(code), _) => code,
            (None, Some(signal)) => 128 + signal,
            (None, None) => 1,
        }
    }
}

impl From<ExitStatus> for ProcessExit {
    fn from(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
            signal: status.signal(),
        }
    }
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {code}"),
            (None, Some(signal)) => write!(f, "killed by signal {signal}"),
            (None, None) => f.write_str("unknown exit status"),
        }
    }
}

/// Answer to `Supervisor::poll`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    Running,
    Exited(ProcessExit),
    /// The pid now belongs to a different process. Never an exit.
    Lost,
}

impl fmt::Display for PollStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollStatus::Running => f.write_str("running"),
            PollStatus::Exited(exit) => write!(f, "exited ({exit})"),
            PollStatus::Lost => f.write_str("lost (pid reused)"),
        }
    }
}

/// What a liveness check found, shared by polling and termination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Liveness {
    Exited(ProcessExit),
    Reused,
    Alive,
}

#[derive(Debug)]
pub(crate) struct HandleInner {
    child: Option<Child>,
    exit: Option<ProcessExit>,
    lost: bool,
    outcome_reported: bool,
    pub(crate) state: TerminationState,
}

impl HandleInner {
    fn new(child: Option<Child>) -> Self {
        Self {
            child,
            exit: None,
            lost: false,
            outcome_reported: false,
            state: TerminationState::Running,
        }
    }

    /// Collect the owned child's exit status if it has one.
    fn reap(&mut self, pid: u32) -> Option<ProcessExit> {
        if self.exit.is_some() {
            return self.exit;
        }
        let child = self.child.as_mut()?;
        match child.try_wait() {
            Ok(Some(status)) => {
                let exit = ProcessExit::from(status);
                self.exit = Some(exit);
                Some(exit)
            }
            Ok(None) => None,
            Err(error) => {
                warn!(pid, %error, "failed to collect child exit status");
                None
            }
        }
    }

    /// True the first time an exit or loss is handed out for reporting.
    pub(crate) fn take_outcome_report(&mut self) -> bool {
        !std::mem::replace(&mut self.outcome_reported, true)
    }
}

/// A launched (or adopted) command process.
///
/// Poll and termination may run concurrently through shared references; all
/// mutable bookkeeping sits behind one lock so both paths see the same state.
#[derive(Debug)]
pub struct CommandProcessHandle {
    pid: u32,
    pid_file: PathBuf,
    log_sink: Option<PathBuf>,
    identity: ProcessIdentity,
    adopted: bool,
    inner: Mutex<HandleInner>,
}

impl CommandProcessHandle {
    pub(crate) fn launched(
        child: Child,
        identity: ProcessIdentity,
        pid_file: PathBuf,
        log_sink: PathBuf,
    ) -> Self {
        Self {
            pid: identity.pid,
            pid_file,
            log_sink: Some(log_sink),
            identity,
            adopted: false,
            inner: Mutex::new(HandleInner::new(Some(child))),
        }
    }

    /// Handle for a process found through its pid-file after a restart.
    pub(crate) fn adopted(identity: ProcessIdentity, pid_file: PathBuf) -> Self {
        Self {
            pid: identity.pid,
            pid_file,
            log_sink: None,
            identity,
            adopted: true,
            inner: Mutex::new(HandleInner::new(None)),
        }
    }

    /// Adopted handle for a pid already held by a process that started after
    /// the pid-file was written. It polls `Lost` and is never signalled.
    pub(crate) fn adopted_reused(pid: u32, pid_file: PathBuf) -> Self {
        let handle = Self::adopted(ProcessIdentity::unknown(pid), pid_file);
        handle.lock().lost = true;
        handle
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn pid_file(&self) -> &Path {
        &self.pid_file
    }

    pub fn log_sink(&self) -> Option<&Path> {
        self.log_sink.as_deref()
    }

    pub fn identity(&self) -> ProcessIdentity {
        self.identity
    }

    pub fn is_adopted(&self) -> bool {
        self.adopted
    }

    pub fn state(&self) -> TerminationState {
        self.lock().state
    }

    /// Exit observed so far, if any.
    pub fn exit(&self) -> Option<ProcessExit> {
        self.lock().exit
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, HandleInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Check whether the process behind this handle is still the one we
    /// launched, and whether it is still running.
    ///
    /// Loss is sticky: once the pid was seen held by another process the
    /// handle never reports an exit.
    pub(crate) fn liveness(&self, inner: &mut HandleInner, table: &dyn ProcessTable) -> Liveness {
        if inner.lost {
            return Liveness::Reused;
        }
        if let Some(exit) = inner.reap(self.pid) {
            return Liveness::Exited(exit);
        }

        match table.probe(self.pid) {
            ProcessProbe::Alive(current) if !self.identity.same_process(&current) => {
                inner.lost = true;
                Liveness::Reused
            }
            ProcessProbe::Alive(_) => Liveness::Alive,
            ProcessProbe::Absent | ProcessProbe::Zombie => {
                if inner.child.is_some() {
                    // Raced with the exit; the owned child has the real status.
                    return Liveness::Exited(inner.reap(self.pid).unwrap_or_default());
                }
                let exit = ProcessExit::unknown();
                inner.exit = Some(exit);
                Liveness::Exited(exit)
            }
        }
    }
}
