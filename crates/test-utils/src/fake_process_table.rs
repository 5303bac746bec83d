use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use cmdwarden::process::{ProcessIdentity, ProcessProbe, ProcessTable};
use cmdwarden::types::TerminationSignal;
use nix::errno::Errno;

/// How a simulated process reacts to signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    /// Exits on SIGTERM (and SIGKILL).
    ExitOnTerm,
    /// Ignores SIGTERM, dies on SIGKILL.
    IgnoreTerm,
    /// Survives everything, e.g. stuck in uninterruptible sleep.
    Unkillable,
    /// Every signal sent to it fails with this errno.
    FailSignals(Errno),
}

#[derive(Debug)]
struct FakeProcess {
    behaviour: Behaviour,
    alive: bool,
    start_time: u64,
    started_at: Option<SystemTime>,
    pgid: u32,
}

#[derive(Debug)]
struct State {
    procs: HashMap<u32, FakeProcess>,
    next_start_time: u64,
    own_pgid: u32,
    signals: Vec<(u32, TerminationSignal)>,
    group_signals: Vec<(u32, TerminationSignal)>,
}

/// In-memory process table.
///
/// - records every signal it is asked to deliver
/// - simulates processes that exit promptly, ignore SIGTERM, cannot be
///   killed, or whose pid gets reused
///
/// Clones share state, so a test keeps one copy to drive and inspect while
/// the supervisor owns another.
#[derive(Debug, Clone)]
pub struct FakeProcessTable {
    state: Arc<Mutex<State>>,
}

impl FakeProcessTable {
    /// Process group of the (fake) supervisor itself.
    pub const OWN_PGID: u32 = 4_000_000;

    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                procs: HashMap::new(),
                next_start_time: 1000,
                own_pgid: Self::OWN_PGID,
                signals: Vec::new(),
                group_signals: Vec::new(),
            })),
        }
    }

    /// Add a live process that leads its own process group.
    pub fn spawn(&self, pid: u32, behaviour: Behaviour) {
        self.spawn_in_group(pid, pid, behaviour);
    }

    /// Add a live process inside an existing group.
    pub fn spawn_in_group(&self, pid: u32, pgid: u32, behaviour: Behaviour) {
        let mut state = self.state.lock().unwrap();
        let start_time = state.next_start_time;
        state.next_start_time += 1;
        state.procs.insert(
            pid,
            FakeProcess {
                behaviour,
                alive: true,
                start_time,
                started_at: None,
                pgid,
            },
        );
    }

    /// The process exits on its own.
    pub fn exit(&self, pid: u32) {
        if let Some(p) = self.state.lock().unwrap().procs.get_mut(&pid) {
            p.alive = false;
        }
    }

    /// The process has exited and an unrelated one now holds its pid.
    pub fn reuse_pid(&self, pid: u32) {
        self.spawn(pid, Behaviour::ExitOnTerm);
    }

    /// Like [`reuse_pid`](Self::reuse_pid), with a known wall-clock start.
    pub fn reuse_pid_at(&self, pid: u32, started_at: SystemTime) {
        self.reuse_pid(pid);
        if let Some(p) = self.state.lock().unwrap().procs.get_mut(&pid) {
            p.started_at = Some(started_at);
        }
    }

    pub fn set_own_process_group(&self, pgid: u32) {
        self.state.lock().unwrap().own_pgid = pgid;
    }

    pub fn is_alive(&self, pid: u32) -> bool {
        self.state
            .lock()
            .unwrap()
            .procs
            .get(&pid)
            .is_some_and(|p| p.alive)
    }

    pub fn identity(&self, pid: u32) -> Option<ProcessIdentity> {
        match self.probe(pid) {
            ProcessProbe::Alive(identity) => Some(identity),
            _ => None,
        }
    }

    /// Signals delivered (or attempted) to single pids, in order.
    pub fn signals_sent(&self) -> Vec<(u32, TerminationSignal)> {
        self.state.lock().unwrap().signals.clone()
    }

    /// Signals delivered (or attempted) to process groups, in order.
    pub fn group_signals_sent(&self) -> Vec<(u32, TerminationSignal)> {
        self.state.lock().unwrap().group_signals.clone()
    }
}

impl Default for FakeProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

fn deliver(process: &mut FakeProcess, signal: TerminationSignal) -> Result<(), Errno> {
    match (process.behaviour, signal) {
        (Behaviour::FailSignals(errno), _) => return Err(errno),
        (Behaviour::ExitOnTerm, _) | (Behaviour::IgnoreTerm, TerminationSignal::Forceful) => {
            process.alive = false
        }
        (Behaviour::IgnoreTerm, TerminationSignal::Graceful) | (Behaviour::Unkillable, _) => {}
    }
    Ok(())
}

impl ProcessTable for FakeProcessTable {
    fn probe(&self, pid: u32) -> ProcessProbe {
        match self.state.lock().unwrap().procs.get(&pid) {
            Some(p) if p.alive => ProcessProbe::Alive(ProcessIdentity {
                pid,
                start_time: Some(p.start_time),
            }),
            _ => ProcessProbe::Absent,
        }
    }

    fn process_group(&self, pid: u32) -> Option<u32> {
        let state = self.state.lock().unwrap();
        state.procs.get(&pid).filter(|p| p.alive).map(|p| p.pgid)
    }

    fn own_process_group(&self) -> u32 {
        self.state.lock().unwrap().own_pgid
    }

    fn signal(&self, pid: u32, signal: TerminationSignal) -> Result<(), Errno> {
        let mut state = self.state.lock().unwrap();
        state.signals.push((pid, signal));
        match state.procs.get_mut(&pid) {
            Some(p) if p.alive => deliver(p, signal),
            _ => Err(Errno::ESRCH),
        }
    }

    fn signal_group(&self, pgid: u32, signal: TerminationSignal) -> Result<(), Errno> {
        let mut state = self.state.lock().unwrap();
        state.group_signals.push((pgid, signal));

        let mut members = state
            .procs
            .values_mut()
            .filter(|p| p.alive && p.pgid == pgid)
            .peekable();
        if members.peek().is_none() {
            return Err(Errno::ESRCH);
        }
        for member in members {
            // Group delivery succeeds as long as one member got it.
            let _ = deliver(member, signal);
        }
        Ok(())
    }

    fn started_at(&self, identity: &ProcessIdentity) -> Option<SystemTime> {
        let state = self.state.lock().unwrap();
        state
            .procs
            .get(&identity.pid)
            .filter(|p| p.alive && Some(p.start_time) == identity.start_time)
            .and_then(|p| p.started_at)
    }
}
