// src/process/terminator.rs

//! Termination state machine.
//!
//! The transition rules live in [`plan`], a pure function over the current
//! [`TerminationState`], what a liveness check observed and the requested
//! signal. [`ProcessTerminator`] wraps it with the handle lock and the actual
//! signal delivery.
//!
//! Signals always go to the process itself first. The process group is only
//! signalled afterwards, and only once group leadership is verified (the
//! process leads its own group and that group is not ours). A child that has
//! not finished `setsid` yet still shares the worker's group, and signalling
//! that group would take the worker down with it.

use std::sync::Arc;

use nix::errno::Errno;
use tracing::{debug, info, warn};

use crate::errors::TerminationError;
use crate::types::TerminationSignal;

use super::handle::{CommandProcessHandle, Liveness, TerminationState};
use super::table::ProcessTable;

/// Liveness as far as the state machine cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observed {
    Gone,
    /// The pid is held by a process we did not launch.
    Reused,
    Alive,
}

impl From<Liveness> for Observed {
    fn from(liveness: Liveness) -> Self {
        match liveness {
            Liveness::Exited(_) => Observed::Gone,
            Liveness::Reused => Observed::Reused,
            Liveness::Alive => Observed::Alive,
        }
    }
}

/// Outcome of [`plan`]: the state to move to and whether to send the signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub state: TerminationState,
    pub send: bool,
}

/// Pure transition function for one termination request.
pub fn plan(current: TerminationState, observed: Observed, signal: TerminationSignal) -> Step {
    use TerminationState::*;

    let stay = |state| Step { state, send: false };

    if current.is_terminal() {
        return stay(current);
    }

    match (observed, signal) {
        (Observed::Gone, _) => stay(ConfirmedDead),
        // Never signal a recycled pid.
        (Observed::Reused, _) => stay(UnknownAssumedDead),
        (Observed::Alive, TerminationSignal::Graceful) if current >= ForceKillRequested => {
            stay(current)
        }
        (Observed::Alive, TerminationSignal::Graceful) => Step {
            state: current.advance(SignalRequested),
            send: true,
        },
        (Observed::Alive, TerminationSignal::Forceful) => Step {
            state: current.advance(ForceKillRequested),
            send: true,
        },
    }
}

/// Drives [`plan`] against live handles.
#[derive(Debug, Clone)]
pub struct ProcessTerminator {
    table: Arc<dyn ProcessTable>,
    signal_group: bool,
}

impl ProcessTerminator {
    pub fn new(table: Arc<dyn ProcessTable>, signal_group: bool) -> Self {
        Self {
            table,
            signal_group,
        }
    }

    /// Idempotent termination entry point.
    ///
    /// Safe to call repeatedly or concurrently for the same handle. "No such
    /// process" is success. Any other signal error leaves the state advanced
    /// to the requested phase so the caller can retry.
    pub fn request_termination(
        &self,
        handle: &CommandProcessHandle,
        signal: TerminationSignal,
    ) -> Result<TerminationState, TerminationError> {
        let pid = handle.pid();
        let mut inner = handle.lock();

        let observed = Observed::from(handle.liveness(&mut inner, self.table.as_ref()));
        let step = plan(inner.state, observed, signal);
        inner.state = step.state;

        if !step.send {
            debug!(pid, %signal, state = %inner.state, ?observed, "termination request is a no-op");
            return Ok(inner.state);
        }

        info!(pid, %signal, "signalling command process");
        match self.table.signal(pid, signal) {
            Ok(()) => {
                self.signal_verified_group(pid, signal);
                Ok(inner.state)
            }
            Err(Errno::ESRCH) => {
                debug!(pid, %signal, "process already gone");
                inner.state = inner.state.advance(TerminationState::ConfirmedDead);
                Ok(inner.state)
            }
            Err(errno) => {
                warn!(pid, %signal, %errno, state = %inner.state, "failed to signal command process");
                Err(TerminationError::Signal { pid, signal, errno })
            }
        }
    }

    /// Give up on a handle whose process could not be confirmed dead.
    pub fn abandon(&self, handle: &CommandProcessHandle) -> TerminationState {
        let mut inner = handle.lock();
        inner.state = inner.state.advance(TerminationState::UnknownAssumedDead);
        inner.state
    }

    fn signal_verified_group(&self, pid: u32, signal: TerminationSignal) {
        if !self.signal_group {
            return;
        }

        let Some(pgid) = self.table.process_group(pid) else {
            debug!(pid, "process group unavailable; skipping group signal");
            return;
        };
        if pgid != pid {
            debug!(pid, pgid, "process does not lead its group yet; skipping group signal");
            return;
        }
        let own = self.table.own_process_group();
        if pgid == own {
            warn!(pid, pgid, "command shares the supervisor's process group; skipping group signal");
            return;
        }

        match self.table.signal_group(pgid, signal) {
            Ok(()) => debug!(pid, pgid, %signal, "signalled command process group"),
            Err(Errno::ESRCH) => debug!(pid, pgid, "process group already empty"),
            Err(errno) => warn!(pid, pgid, %signal, %errno, "failed to signal process group"),
        }
    }
}
