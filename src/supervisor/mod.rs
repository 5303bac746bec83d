// src/supervisor/mod.rs

//! The command process supervisor.
//!
//! One `Supervisor` serves any number of concurrent commands; it is shared by
//! reference and keeps no per-command state of its own. Everything about a
//! command lives in its [`CommandProcessHandle`], which the caller owns.
//!
//! Lifecycle of a command:
//! - [`Supervisor::start`] picks a launch strategy and returns a handle once
//!   the pid-file is on disk.
//! - [`Supervisor::poll`] / [`Supervisor::wait`] observe it.
//! - [`Supervisor::stop`] drives SIGTERM, the grace period and SIGKILL.
//! - [`Supervisor::retire`] removes the pid-file and drops the handle.

pub mod report;

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::config::model::{ConfigFile, SupervisorSettings};
use crate::env::ambient_environment;
use crate::errors::{LaunchError, Result, SupervisorError, TerminationError};
use crate::launch::{
    DirectLaunch, LaunchContext, LaunchStrategy, ManagedEnvironmentLaunch, SpawnRequest,
};
use crate::process::handle::Liveness;
use crate::process::{
    CommandProcessHandle, OsProcessTable, PollStatus, ProcessExit, ProcessIdentity, ProcessProbe,
    ProcessTable, ProcessTerminator, TerminationState, read_pid_file, remove_pid_file,
};
use crate::resolve::{CatalogResolver, EnvironmentResolver};
use crate::types::TerminationSignal;

pub use report::{ChannelReporter, StatusReporter, SupervisorEvent, TracingReporter};

/// Result of [`Supervisor::stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopOutcome {
    /// Always terminal.
    pub state: TerminationState,
    /// SIGKILL had to be sent.
    pub forced: bool,
}

#[derive(Debug, Clone)]
pub struct Supervisor {
    settings: SupervisorSettings,
    table: Arc<dyn ProcessTable>,
    terminator: ProcessTerminator,
    direct: DirectLaunch,
    managed: ManagedEnvironmentLaunch,
    reporter: Arc<dyn StatusReporter>,
}

impl Supervisor {
    pub fn new(settings: SupervisorSettings, resolver: Arc<dyn EnvironmentResolver>) -> Self {
        let table: Arc<dyn ProcessTable> = Arc::new(OsProcessTable);
        Self {
            terminator: ProcessTerminator::new(table.clone(), settings.signal_process_group),
            settings,
            table,
            direct: DirectLaunch,
            managed: ManagedEnvironmentLaunch::new(resolver),
            reporter: Arc::new(TracingReporter),
        }
    }

    /// Supervisor resolving packages from the config's `[packages]` table.
    pub fn from_config(cfg: &ConfigFile) -> Self {
        Self::new(
            cfg.supervisor.clone(),
            Arc::new(CatalogResolver::from_config(cfg)),
        )
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn StatusReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_process_table(mut self, table: Arc<dyn ProcessTable>) -> Self {
        self.terminator = ProcessTerminator::new(table.clone(), self.settings.signal_process_group);
        self.table = table;
        self
    }

    pub fn settings(&self) -> &SupervisorSettings {
        &self.settings
    }

    /// Launch a command. Managed when the request names packages, direct
    /// otherwise.
    pub fn start(
        &self,
        request: &SpawnRequest,
    ) -> std::result::Result<CommandProcessHandle, LaunchError> {
        let strategy: &dyn LaunchStrategy = if request.packages().is_some() {
            &self.managed
        } else {
            &self.direct
        };

        let ambient = ambient_environment();
        let ctx = LaunchContext {
            limits: self.settings.limits,
            ambient: &ambient,
            table: self.table.as_ref(),
        };

        match strategy.launch(request, &ctx) {
            Ok(handle) => {
                self.reporter.report(SupervisorEvent::Launched {
                    pid: handle.pid(),
                    pid_file: handle.pid_file().to_path_buf(),
                    log_sink: request.log_sink().to_path_buf(),
                    managed: request.packages().is_some(),
                });
                Ok(handle)
            }
            Err(err) => {
                warn!(strategy = strategy.name(), error = %err, "launch failed");
                self.reporter.report(SupervisorEvent::LaunchFailed {
                    program: request.program().unwrap_or_default().to_string(),
                    error: err.to_string(),
                });
                Err(err)
            }
        }
    }

    /// Non-blocking status check.
    ///
    /// An exit or loss is reported upward the first time it is observed.
    pub fn poll(&self, handle: &CommandProcessHandle) -> PollStatus {
        let mut inner = handle.lock();
        let status = match handle.liveness(&mut inner, self.table.as_ref()) {
            Liveness::Alive => return PollStatus::Running,
            Liveness::Exited(exit) => {
                inner.state = inner.state.advance(TerminationState::ConfirmedDead);
                PollStatus::Exited(exit)
            }
            Liveness::Reused => {
                inner.state = inner.state.advance(TerminationState::UnknownAssumedDead);
                PollStatus::Lost
            }
        };
        let first = inner.take_outcome_report();
        drop(inner);

        if first {
            let pid = handle.pid();
            match status {
                PollStatus::Exited(exit) => self.reporter.report(SupervisorEvent::Exited { pid, exit }),
                PollStatus::Lost => self.reporter.report(SupervisorEvent::Lost { pid }),
                PollStatus::Running => {}
            }
        }
        status
    }

    /// Wait for the command to exit, polling at the configured interval.
    pub async fn wait(&self, handle: &CommandProcessHandle) -> Result<ProcessExit> {
        loop {
            match self.poll(handle) {
                PollStatus::Running => sleep(self.settings.poll_interval).await,
                PollStatus::Exited(exit) => return Ok(exit),
                PollStatus::Lost => return Err(SupervisorError::LostProcess { pid: handle.pid() }),
            }
        }
    }

    /// Single termination request; see [`ProcessTerminator::request_termination`].
    pub fn request_termination(
        &self,
        handle: &CommandProcessHandle,
        signal: TerminationSignal,
    ) -> std::result::Result<TerminationState, TerminationError> {
        self.terminator.request_termination(handle, signal)
    }

    /// Shut the command down within `timeout`.
    ///
    /// SIGTERM first; SIGKILL once the grace period (capped by `timeout`)
    /// has passed. A process that cannot be confirmed dead by the deadline
    /// is abandoned as `UnknownAssumedDead` rather than waited on forever.
    pub async fn stop(&self, handle: &CommandProcessHandle, timeout: Duration) -> StopOutcome {
        let started = Instant::now();
        let deadline = deadline_after(started, timeout);
        let grace_deadline = deadline_after(started, self.settings.grace_period.min(timeout));
        let pid = handle.pid();

        match self.signal_with_retries(handle, TerminationSignal::Graceful).await {
            Some(state) if state.is_terminal() => return self.finish(handle, false),
            Some(_) => {
                if self.wait_until(handle, grace_deadline).await {
                    return self.finish(handle, false);
                }
                info!(pid, grace = ?self.settings.grace_period, "grace period expired; escalating");
            }
            None => warn!(pid, "graceful signal could not be delivered; escalating"),
        }

        match self.signal_with_retries(handle, TerminationSignal::Forceful).await {
            Some(state) if state.is_terminal() => return self.finish(handle, false),
            Some(_) => {
                if self.wait_until(handle, deadline).await {
                    return self.finish(handle, true);
                }
                warn!(pid, ?timeout, "process survived SIGKILL; abandoning it");
            }
            None => warn!(pid, "forceful signal could not be delivered; abandoning process"),
        }

        self.terminator.abandon(handle);
        self.finish(handle, true)
    }

    /// Discard a handle whose process is gone, removing its pid-file.
    ///
    /// A still-running process is refused and its handle handed back inside
    /// the error.
    pub fn retire(&self, handle: CommandProcessHandle) -> Result<()> {
        if self.poll(&handle) == PollStatus::Running {
            return Err(SupervisorError::StillRunning(Box::new(handle)));
        }

        remove_pid_file(handle.pid_file())?;
        debug!(
            pid = handle.pid(),
            pid_file = %handle.pid_file().display(),
            state = %handle.state(),
            "command retired"
        );
        Ok(())
    }

    /// Rebuild a handle from a pid-file, e.g. after a worker restart.
    ///
    /// The adopted handle has no child object, so its exit status is never
    /// known. A process that started after the pid-file was written cannot be
    /// the one it records; its handle polls `Lost` from the start.
    pub fn adopt(&self, pid_file: &Path) -> Result<CommandProcessHandle> {
        let pid = read_pid_file(pid_file)?;
        let identity = match self.table.probe(pid) {
            ProcessProbe::Alive(identity) => identity,
            ProcessProbe::Absent | ProcessProbe::Zombie => ProcessIdentity::unknown(pid),
        };

        let written = fs::metadata(pid_file).and_then(|m| m.modified()).ok();
        let started = self.table.started_at(&identity);
        if let (Some(written), Some(started)) = (written, started)
            && started > written
        {
            warn!(
                pid,
                pid_file = %pid_file.display(),
                "pid is held by a process newer than the pid-file; treating it as lost"
            );
            return Ok(CommandProcessHandle::adopted_reused(pid, pid_file.to_path_buf()));
        }

        info!(pid, pid_file = %pid_file.display(), "adopted command process");
        Ok(CommandProcessHandle::adopted(identity, pid_file.to_path_buf()))
    }

    async fn signal_with_retries(
        &self,
        handle: &CommandProcessHandle,
        signal: TerminationSignal,
    ) -> Option<TerminationState> {
        let attempts = self.settings.max_termination_attempts.max(1);
        for attempt in 1..=attempts {
            match self.terminator.request_termination(handle, signal) {
                Ok(state) => return Some(state),
                Err(err) => {
                    warn!(attempt, attempts, error = %err, "termination request failed");
                    if attempt < attempts {
                        sleep(self.settings.poll_interval).await;
                    }
                }
            }
        }
        None
    }

    /// Poll until the process is gone or `deadline` passes. True if gone.
    async fn wait_until(&self, handle: &CommandProcessHandle, deadline: Instant) -> bool {
        loop {
            if self.poll(handle) != PollStatus::Running {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            sleep(self.settings.poll_interval.min(deadline - now)).await;
        }
    }

    fn finish(&self, handle: &CommandProcessHandle, forced: bool) -> StopOutcome {
        // Collect and report the exit (or loss) if not seen yet.
        let _ = self.poll(handle);

        let outcome = StopOutcome {
            state: handle.state(),
            forced,
        };
        self.reporter.report(SupervisorEvent::Terminated {
            pid: handle.pid(),
            state: outcome.state,
            forced: outcome.forced,
        });
        outcome
    }
}

/// `start + after`, saturating at a far-off instant instead of panicking on
/// absurd configured durations.
fn deadline_after(start: Instant, after: Duration) -> Instant {
    const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);
    start
        .checked_add(after)
        .unwrap_or_else(|| start + FAR_FUTURE)
}
