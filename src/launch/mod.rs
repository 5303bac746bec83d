// src/launch/mod.rs

//! Launch strategies.
//!
//! Both strategies end in [`spawn_supervised`], which owns the parts every
//! launch shares: resource-limit preflight, log sink wiring, the pre-exec
//! hook, identity fingerprinting and the pid-file. A strategy only decides
//! which command line and environment the child gets.

pub mod direct;
pub mod managed;
pub mod request;

use std::fmt::Debug;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{info, warn};

use crate::env::Environment;
use crate::errors::LaunchError;
use crate::limits::ResourceLimits;
use crate::process::table::{ProcessIdentity, ProcessProbe, ProcessTable};
use crate::process::{CommandProcessHandle, remove_pid_file, write_pid_file};

pub use direct::DirectLaunch;
pub use managed::ManagedEnvironmentLaunch;
pub use request::{SpawnRequest, SpawnRequestBuilder};

/// Worker-side inputs shared by every launch.
#[derive(Debug, Clone, Copy)]
pub struct LaunchContext<'a> {
    pub limits: ResourceLimits,
    /// Environment the per-command overrides are merged over.
    pub ambient: &'a Environment,
    /// Used to fingerprint the new process.
    pub table: &'a dyn ProcessTable,
}

pub trait LaunchStrategy: Send + Sync + Debug {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Start the command. On success the pid-file already exists; on failure
    /// none is left behind.
    fn launch(
        &self,
        request: &SpawnRequest,
        ctx: &LaunchContext<'_>,
    ) -> Result<CommandProcessHandle, LaunchError>;
}

pub(crate) fn validate_arguments(request: &SpawnRequest) -> Result<(), LaunchError> {
    let invalid = |msg: String| Err(LaunchError::InvalidArguments(msg));

    match request.program() {
        None => return invalid("argument list is empty".to_string()),
        Some("") => return invalid("program name is empty".to_string()),
        Some(_) => {}
    }

    if let Some(idx) = request.args().iter().position(|a| a.contains('\0')) {
        return invalid(format!("argument {idx} contains a NUL byte"));
    }

    for (key, value) in request.env() {
        if key.is_empty() || key.contains('=') || key.contains('\0') {
            return invalid(format!("invalid environment variable name {key:?}"));
        }
        if value.contains('\0') {
            return invalid(format!("environment variable {key} contains a NUL byte"));
        }
    }

    Ok(())
}

/// Open the log sink for appending. The file is created if missing; its
/// directory is not.
pub(crate) fn open_log_sink(path: &Path) -> Result<File, LaunchError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| LaunchError::LogSink {
            path: path.to_path_buf(),
            source,
        })
}

/// Spawn `cmd` under supervision and record its pid.
///
/// `cmd` must already carry its program, arguments and environment.
pub(crate) fn spawn_supervised(
    mut cmd: Command,
    request: &SpawnRequest,
    ctx: &LaunchContext<'_>,
) -> Result<CommandProcessHandle, LaunchError> {
    ctx.limits.preflight()?;

    let stdout = open_log_sink(request.log_sink())?;
    let stderr = stdout.try_clone().map_err(|source| LaunchError::LogSink {
        path: request.log_sink().to_path_buf(),
        source,
    })?;

    cmd.stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr))
        .kill_on_drop(false);

    let hook = ctx.limits.pre_exec_hook();
    // SAFETY: the hook only issues setsid/getrlimit/setrlimit, all of which
    // are async-signal-safe, and touches no state shared with the parent.
    unsafe {
        cmd.pre_exec(hook);
    }

    let program = request.program().unwrap_or_default().to_string();
    let mut child = cmd.spawn().map_err(|source| LaunchError::Spawn {
        program: program.clone(),
        source,
    })?;

    let Some(pid) = child.id() else {
        return Err(LaunchError::Spawn {
            program,
            source: io::Error::other("child exited before its pid could be read"),
        });
    };

    let identity = match ctx.table.probe(pid) {
        ProcessProbe::Alive(identity) => identity,
        ProcessProbe::Absent | ProcessProbe::Zombie => ProcessIdentity::unknown(pid),
    };

    if let Err(source) = write_pid_file(request.pid_file(), pid) {
        if let Err(error) = child.start_kill() {
            warn!(pid, %error, "failed to kill command after pid-file failure");
        }
        // Dropping the child hands it to tokio's orphan reaper.
        drop(child);
        if let Err(error) = remove_pid_file(request.pid_file()) {
            warn!(pid, %error, "failed to clean up partial pid-file");
        }
        return Err(LaunchError::PidFile {
            path: request.pid_file().to_path_buf(),
            source,
        });
    }

    info!(
        pid,
        program = %program,
        pid_file = %request.pid_file().display(),
        log_sink = %request.log_sink().display(),
        "command process started"
    );

    Ok(CommandProcessHandle::launched(
        child,
        identity,
        request.pid_file().to_path_buf(),
        request.log_sink().to_path_buf(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_invalid(request: SpawnRequest) {
        match validate_arguments(&request) {
            Err(LaunchError::InvalidArguments(_)) => {}
            other => panic!("expected InvalidArguments, got {other:?}"),
        }
    }

    #[test]
    fn empty_and_nul_arguments_are_rejected() {
        assert_invalid(SpawnRequest::builder("p", "l").build());
        assert_invalid(SpawnRequest::builder("p", "l").arg("").build());
        assert_invalid(SpawnRequest::builder("p", "l").args(["echo", "a\0b"]).build());
    }

    #[test]
    fn malformed_environment_names_are_rejected() {
        assert_invalid(SpawnRequest::builder("p", "l").arg("true").env("A=B", "1").build());
        assert_invalid(SpawnRequest::builder("p", "l").arg("true").env("", "1").build());
        assert_invalid(SpawnRequest::builder("p", "l").arg("true").env("A", "x\0").build());
    }

    #[test]
    fn ordinary_request_is_valid() {
        let request = SpawnRequest::builder("p", "l")
            .args(["render", "--frame", "1"])
            .env("THREADS", 4)
            .build();
        assert!(validate_arguments(&request).is_ok());
    }

    #[test]
    fn log_sink_directory_is_not_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("cmd.log");
        assert!(matches!(
            open_log_sink(&path),
            Err(LaunchError::LogSink { .. })
        ));
    }
}
