// src/process/pidfile.rs

//! Pid-files: the durable record that a command process was launched.
//!
//! Content is the decimal pid and nothing else. Writes go through a sibling
//! temporary file and a rename so recovery tooling never reads a half-written
//! pid.

use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use crate::errors::{Result, SupervisorError};

pub fn write_pid_file(path: &Path, pid: u32) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let tmp = temporary_path(path);
    fs::write(&tmp, pid.to_string())?;
    fs::rename(&tmp, path).inspect_err(|_| {
        let _ = fs::remove_file(&tmp);
    })
}

pub fn read_pid_file(path: &Path) -> Result<u32> {
    let raw = fs::read_to_string(path)?;
    let invalid = |reason: String| SupervisorError::InvalidPidFile {
        path: path.to_path_buf(),
        reason,
    };

    let pid: u32 = raw
        .trim()
        .parse()
        .map_err(|e| invalid(format!("'{}' is not a pid: {e}", raw.trim())))?;

    if pid == 0 || i32::try_from(pid).is_err() {
        return Err(invalid(format!("{pid} is outside the valid pid range")));
    }
    Ok(pid)
}

/// Remove a pid-file; one that is already gone is not an error.
pub fn remove_pid_file(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

fn temporary_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "pid".to_string());
    path.with_file_name(format!(".{name}.tmp"))
}
