// src/limits.rs

//! Resource limits and process-group isolation for command processes.
//!
//! The work happens in two places:
//! - [`ResourceLimits::preflight`] runs in the worker before spawning and
//!   turns an impossible ceiling into a typed [`ResourceLimitError`], so no
//!   process is created at all.
//! - [`ResourceLimits::pre_exec_hook`] runs in the forked child, strictly
//!   before exec. It starts a new session (the child becomes leader of its
//!   own process group) and then adjusts the soft `RLIMIT_NOFILE`. Any failure
//!   aborts the spawn and the target executable never runs.

use std::io;

use nix::errno::Errno;
use nix::sys::resource::{Resource, getrlimit, setrlimit};
use nix::unistd::setsid;

use crate::errors::ResourceLimitError;

/// Immutable per-process limits applied at creation time only.
///
/// A configured ceiling is validated strictly. Without one, the child gets
/// [`ResourceLimits::DEFAULT_MAX_OPEN_FILES`] when the hard limit allows it
/// and keeps the inherited soft limit otherwise.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceLimits {
    max_open_files: Option<u64>,
}

impl ResourceLimits {
    pub const DEFAULT_MAX_OPEN_FILES: u64 = 32768;

    /// Limits with an explicitly configured open-file ceiling.
    pub fn new(max_open_files: u64) -> Self {
        Self {
            max_open_files: Some(max_open_files),
        }
    }

    /// The configured ceiling, if any.
    pub fn max_open_files(&self) -> Option<u64> {
        self.max_open_files
    }

    /// Validate a configured ceiling against the worker's own hard limit,
    /// which the child inherits.
    pub fn preflight(&self) -> Result<(), ResourceLimitError> {
        let Some(ceiling) = self.max_open_files else {
            return Ok(());
        };
        let (_soft, hard) =
            getrlimit(Resource::RLIMIT_NOFILE).map_err(ResourceLimitError::Unsupported)?;
        check_ceiling(ceiling, hard)
    }

    /// Build the hook to install with `Command::pre_exec`.
    pub fn pre_exec_hook(self) -> impl FnMut() -> io::Result<()> + Send + Sync + 'static {
        let configured = self.max_open_files;
        move || apply_in_child(configured)
    }
}

fn check_ceiling(ceiling: u64, hard: u64) -> Result<(), ResourceLimitError> {
    if ceiling == 0 {
        return Err(ResourceLimitError::InvalidCeiling(ceiling));
    }
    if ceiling > hard {
        return Err(ResourceLimitError::AboveHardLimit { ceiling, hard });
    }
    Ok(())
}

/// Soft limit to install for the child, or `None` to leave it untouched.
fn soft_limit_for(configured: Option<u64>, hard: u64) -> Result<Option<u64>, Errno> {
    let ceiling = match configured {
        Some(ceiling) if ceiling == 0 || ceiling > hard => return Err(Errno::EINVAL),
        Some(ceiling) => ceiling,
        None => ResourceLimits::DEFAULT_MAX_OPEN_FILES,
    };
    Ok((ceiling < hard).then_some(ceiling))
}

// Runs between fork and exec: no allocation, no locks, only raw syscalls.
fn apply_in_child(configured: Option<u64>) -> io::Result<()> {
    setsid()?;

    let (_soft, hard) = getrlimit(Resource::RLIMIT_NOFILE)?;
    if let Some(soft) = soft_limit_for(configured, hard)? {
        setrlimit(Resource::RLIMIT_NOFILE, soft, hard)?;
    }
    Ok(())
}
