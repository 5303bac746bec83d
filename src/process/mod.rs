// src/process/mod.rs

//! Process-level primitives: the OS process table seam, handles, pid-files
//! and the termination state machine.

pub mod handle;
pub mod pidfile;
pub mod table;
pub mod terminator;

pub use handle::{CommandProcessHandle, PollStatus, ProcessExit, TerminationState};
pub use pidfile::{read_pid_file, remove_pid_file, write_pid_file};
pub use table::{OsProcessTable, ProcessIdentity, ProcessProbe, ProcessTable};
pub use terminator::ProcessTerminator;
