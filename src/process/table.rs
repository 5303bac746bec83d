// src/process/table.rs

//! OS process table seam.
//!
//! Everything the supervisor needs to know about processes it does not own a
//! child object for (liveness, identity, process group) and every signal it
//! sends goes through [`ProcessTable`]. Production code uses
//! [`OsProcessTable`]; tests swap in a fake that simulates stubborn or
//! recycled processes.

use std::fmt::Debug;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use nix::errno::Errno;
use nix::sys::signal::{kill, killpg};
use nix::unistd::{Pid, SysconfVar, getpgid, getpgrp, sysconf};

use crate::types::TerminationSignal;

/// Who currently holds a pid.
///
/// `start_time` is the kernel's start tick for the process where the
/// platform exposes it; two identities with different start times are
/// different processes even when the pid matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessIdentity {
    pub pid: u32,
    pub start_time: Option<u64>,
}

impl ProcessIdentity {
    /// Identity for a pid whose start time cannot be determined.
    pub fn unknown(pid: u32) -> Self {
        Self {
            pid,
            start_time: None,
        }
    }

    /// Same pid, and no evidence that the process was replaced.
    pub fn same_process(&self, other: &ProcessIdentity) -> bool {
        if self.pid != other.pid {
            return false;
        }
        match (self.start_time, other.start_time) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }
}

/// Result of looking a pid up in the process table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessProbe {
    Absent,
    /// Exited but not yet reaped by its parent.
    Zombie,
    Alive(ProcessIdentity),
}

pub trait ProcessTable: Send + Sync + Debug {
    fn probe(&self, pid: u32) -> ProcessProbe;

    /// Process group of `pid`, if it still exists.
    fn process_group(&self, pid: u32) -> Option<u32>;

    /// Process group of the supervisor itself.
    fn own_process_group(&self) -> u32;

    fn signal(&self, pid: u32, signal: TerminationSignal) -> Result<(), Errno>;

    fn signal_group(&self, pgid: u32, signal: TerminationSignal) -> Result<(), Errno>;

    /// Wall-clock start of the process behind `identity`, where the platform
    /// can tell.
    fn started_at(&self, _identity: &ProcessIdentity) -> Option<SystemTime> {
        None
    }
}

/// The real process table (`/proc` where available, `kill(2)` otherwise).
#[derive(Debug, Clone, Copy, Default)]
pub struct OsProcessTable;

impl ProcessTable for OsProcessTable {
    fn probe(&self, pid: u32) -> ProcessProbe {
        let Ok(nix_pid) = to_nix_pid(pid) else {
            return ProcessProbe::Absent;
        };

        if let Some(probe) = read_proc_stat(pid) {
            return probe;
        }

        // No procfs: fall back to the null signal. EPERM still means the
        // pid is held by someone.
        match kill(nix_pid, None) {
            Ok(()) | Err(Errno::EPERM) => ProcessProbe::Alive(ProcessIdentity::unknown(pid)),
            Err(_) => ProcessProbe::Absent,
        }
    }

    fn process_group(&self, pid: u32) -> Option<u32> {
        let nix_pid = to_nix_pid(pid).ok()?;
        getpgid(Some(nix_pid))
            .ok()
            .map(|pgid| pgid.as_raw() as u32)
    }

    fn own_process_group(&self) -> u32 {
        getpgrp().as_raw() as u32
    }

    fn signal(&self, pid: u32, signal: TerminationSignal) -> Result<(), Errno> {
        kill(to_nix_pid(pid)?, signal.as_signal())
    }

    fn signal_group(&self, pgid: u32, signal: TerminationSignal) -> Result<(), Errno> {
        // pgid 1 is init's group; never a command's.
        if pgid <= 1 {
            return Err(Errno::EINVAL);
        }
        killpg(to_nix_pid(pgid)?, signal.as_signal())
    }

    fn started_at(&self, identity: &ProcessIdentity) -> Option<SystemTime> {
        let ticks = identity.start_time?;
        let boot = fs::read_to_string("/proc/stat").ok()?;
        let ticks_per_sec = sysconf(SysconfVar::CLK_TCK).ok().flatten()?;
        start_wall_time(&boot, ticks, u64::try_from(ticks_per_sec).ok()?)
    }
}

/// Boot time (`btime` in `/proc/stat`) plus the start tick.
fn start_wall_time(proc_stat: &str, ticks: u64, ticks_per_sec: u64) -> Option<SystemTime> {
    if ticks_per_sec == 0 {
        return None;
    }
    let btime: u64 = proc_stat
        .lines()
        .find_map(|line| line.strip_prefix("btime "))?
        .trim()
        .parse()
        .ok()?;
    let since_boot = Duration::from_secs(ticks / ticks_per_sec)
        + Duration::from_nanos((ticks % ticks_per_sec) * 1_000_000_000 / ticks_per_sec);
    UNIX_EPOCH.checked_add(Duration::from_secs(btime))?.checked_add(since_boot)
}

/// Pid 0 and negative pids address whole groups in `kill(2)`; refuse them.
fn to_nix_pid(pid: u32) -> Result<Pid, Errno> {
    match i32::try_from(pid) {
        Ok(raw) if raw > 0 => Ok(Pid::from_raw(raw)),
        _ => Err(Errno::EINVAL),
    }
}

fn read_proc_stat(pid: u32) -> Option<ProcessProbe> {
    match fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(raw) => parse_proc_stat(pid, &raw),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            if Path::new("/proc/self/stat").exists() {
                Some(ProcessProbe::Absent)
            } else {
                None
            }
        }
        Err(_) => None,
    }
}

/// `/proc/<pid>/stat`: the state is the first field after the parenthesised
/// command name, the start time is field 22.
fn parse_proc_stat(pid: u32, raw: &str) -> Option<ProcessProbe> {
    let after_comm = &raw[raw.rfind(')')? + 1..];
    let mut fields = after_comm.split_whitespace();

    let state = fields.next()?;
    if state == "Z" || state == "X" {
        return Some(ProcessProbe::Zombie);
    }

    let start_time = fields.nth(18)?.parse().ok()?;
    Some(ProcessProbe::Alive(ProcessIdentity {
        pid,
        start_time: Some(start_time),
    }))
}
