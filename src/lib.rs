// src/lib.rs

#[cfg(not(unix))]
compile_error!("cmdwarden relies on unix process groups and resource limits");

pub mod cli;
pub mod config;
pub mod env;
pub mod errors;
pub mod launch;
pub mod limits;
pub mod logging;
pub mod process;
pub mod resolve;
pub mod supervisor;
pub mod types;

use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use tokio::signal::unix::{Signal, SignalKind, signal};
use tracing::{debug, info, warn};

use crate::cli::{CliArgs, Command, resolve_pid_file};
use crate::config::loader::load_optional;
use crate::config::model::ConfigFile;
use crate::errors::SupervisorError;
use crate::launch::SpawnRequest;
use crate::limits::ResourceLimits;
use crate::process::{PollStatus, TerminationState};
use crate::supervisor::Supervisor;

pub use crate::launch::SpawnRequestBuilder;
pub use crate::process::{CommandProcessHandle, ProcessExit};
pub use crate::supervisor::StopOutcome;
pub use crate::types::{PackageList, TerminationSignal};

/// High-level entry point used by `main.rs`. Returns the process exit code.
///
/// This wires together:
/// - config loading
/// - the supervisor and its package resolver
/// - the selected subcommand
/// - Ctrl-C and SIGTERM handling for `run`
pub async fn run(args: CliArgs) -> Result<i32> {
    let cfg = load_optional(&args.config)?;
    let pid_dir = cfg.supervisor.pid_dir.clone();

    match args.command {
        Command::Check => {
            print_check(&args.config, &cfg);
            Ok(0)
        }
        Command::Status { pid_file } => {
            let supervisor = Supervisor::from_config(&cfg);
            status(&supervisor, &resolve_pid_file(&pid_dir, &pid_file))
        }
        Command::Stop { pid_file, timeout } => {
            let supervisor = Supervisor::from_config(&cfg);
            stop(&supervisor, &resolve_pid_file(&pid_dir, &pid_file), timeout).await
        }
        Command::Run {
            pid_file,
            log,
            env,
            packages,
            stop_timeout,
            args,
        } => {
            let mut builder =
                SpawnRequest::builder(resolve_pid_file(&pid_dir, &pid_file), log)
                    .args(args)
                    .envs(env);
            if let Some(packages) = packages {
                builder = builder.packages(packages.as_str());
            }

            let supervisor = Supervisor::from_config(&cfg);
            run_command(&supervisor, &builder.build(), stop_timeout).await
        }
    }
}

/// Launch, wait (or stop on Ctrl-C/SIGTERM), retire. Exit code mirrors the command.
async fn run_command(
    supervisor: &Supervisor,
    request: &SpawnRequest,
    stop_timeout: Duration,
) -> Result<i32> {
    let mut shutdown = ShutdownListener::install();
    let handle = supervisor.start(request)?;

    let outcome: std::result::Result<ProcessExit, SupervisorError> = tokio::select! {
        res = supervisor.wait(&handle) => res,
        received = shutdown.recv() => {
            info!(pid = handle.pid(), signal = received, "shutdown requested; stopping command");
            let stopped = supervisor.stop(&handle, stop_timeout).await;
            match handle.exit() {
                Some(exit) => Ok(exit),
                None if stopped.state == TerminationState::ConfirmedDead => Ok(ProcessExit::unknown()),
                None => Err(anyhow::anyhow!(
                    "command pid {} could not be confirmed dead ({})",
                    handle.pid(),
                    stopped.state
                )
                .into()),
            }
        }
    };

    supervisor.retire(handle)?;
    let exit = outcome?;
    debug!(%exit, "command finished");
    Ok(exit.shell_code())
}

async fn stop(supervisor: &Supervisor, pid_file: &Path, timeout: Duration) -> Result<i32> {
    let handle = supervisor.adopt(pid_file)?;
    let outcome = supervisor.stop(&handle, timeout).await;

    println!(
        "pid {}: {}{}",
        handle.pid(),
        outcome.state,
        if outcome.forced { " (forced)" } else { "" }
    );

    supervisor.retire(handle)?;
    Ok(if outcome.state == TerminationState::ConfirmedDead {
        0
    } else {
        1
    })
}

/// Exit codes follow the LSB `status` convention: 0 running, 1 dead with a
/// pid-file left behind, 3 not running.
fn status(supervisor: &Supervisor, pid_file: &Path) -> Result<i32> {
    let handle = match supervisor.adopt(pid_file) {
        Ok(handle) => handle,
        Err(SupervisorError::IoError(e)) if e.kind() == ErrorKind::NotFound => {
            println!("not running (no pid-file at {})", pid_file.display());
            return Ok(3);
        }
        Err(e) => return Err(e.into()),
    };

    let status = supervisor.poll(&handle);
    println!("pid {}: {status}", handle.pid());
    Ok(match status {
        PollStatus::Running => 0,
        PollStatus::Exited(_) | PollStatus::Lost => 1,
    })
}

/// Ctrl-C and SIGTERM listener. The SIGTERM handler is installed on
/// construction, so a stop request that races the launch is not lost.
struct ShutdownListener {
    terminate: Option<Signal>,
}

impl ShutdownListener {
    fn install() -> Self {
        let terminate = match signal(SignalKind::terminate()) {
            Ok(terminate) => Some(terminate),
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                None
            }
        };
        Self { terminate }
    }

    /// Resolves with the signal name when the worker is asked to shut down.
    async fn recv(&mut self) -> &'static str {
        let interrupt = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        };
        let terminate = async {
            if let Some(terminate) = self.terminate.as_mut()
                && terminate.recv().await.is_some()
            {
                return;
            }
            std::future::pending::<()>().await
        };

        tokio::select! {
            _ = interrupt => "SIGINT",
            _ = terminate => "SIGTERM",
        }
    }
}

/// Print the validated config; no execution.
fn print_check(config_path: &Path, cfg: &ConfigFile) {
    let s = &cfg.supervisor;
    println!("cmdwarden check ({})", config_path.display());
    println!("  supervisor.pid_dir = {}", s.pid_dir.display());
    match s.limits.max_open_files() {
        Some(ceiling) => println!("  supervisor.max_open_files = {ceiling}"),
        None => println!(
            "  supervisor.max_open_files = (default {}, capped at the hard limit)",
            ResourceLimits::DEFAULT_MAX_OPEN_FILES
        ),
    }
    println!("  supervisor.grace_period = {:?}", s.grace_period);
    println!("  supervisor.poll_interval = {:?}", s.poll_interval);
    println!(
        "  supervisor.max_termination_attempts = {}",
        s.max_termination_attempts
    );
    println!(
        "  supervisor.signal_process_group = {}",
        s.signal_process_group
    );
    println!("  supervisor.shell = {}", s.shell);
    println!();

    println!("packages ({}):", cfg.packages.len());
    for (name, package) in cfg.packages.iter() {
        println!("  - {name}");
        if !package.requires.is_empty() {
            println!("      requires: {:?}", package.requires);
        }
        if !package.path.is_empty() {
            println!("      path: {:?}", package.path);
        }
        for (key, value) in package.env.iter() {
            println!("      env: {key}={value}");
        }
    }

    debug!("check complete (no execution)");
}
