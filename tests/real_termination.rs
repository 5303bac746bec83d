// tests/real_termination.rs
//
// Escalation against real `sh` processes.

use std::error::Error;
use std::fs;
use std::path::Path;
use std::time::Duration;

use cmdwarden::launch::SpawnRequest;
use cmdwarden::process::{OsProcessTable, ProcessProbe, ProcessTable, TerminationState};
use cmdwarden::supervisor::StopOutcome;
use cmdwarden_test_utils::builders::{ConfigFileBuilder, fast_settings, real_supervisor};
use cmdwarden_test_utils::{RecordingReporter, init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

fn sh(dir: &Path, script: &str) -> SpawnRequest {
    SpawnRequest::builder(dir.join("cmd.pid"), dir.join("cmd.log"))
        .args(["sh", "-c", script])
        .build()
}

/// Wait until `needle` shows up in `path`, so signal handlers are installed
/// before we start signalling.
async fn wait_for_file_content(path: &Path, needle: &str) {
    loop {
        if fs::read_to_string(path).is_ok_and(|s| s.contains(needle)) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn cooperative_command_stops_on_sigterm() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let reporter = RecordingReporter::new();
    let supervisor = real_supervisor(&ConfigFileBuilder::new().build(), &reporter);

    let handle = supervisor.start(
        &SpawnRequest::builder(dir.path().join("cmd.pid"), dir.path().join("cmd.log"))
            .args(["sleep", "30"])
            .build(),
    )?;
    let outcome = with_timeout(supervisor.stop(&handle, Duration::from_secs(5))).await;

    assert_eq!(
        outcome,
        StopOutcome {
            state: TerminationState::ConfirmedDead,
            forced: false
        }
    );
    assert_eq!(handle.exit().and_then(|e| e.signal()), Some(15));
    supervisor.retire(handle)?;
    assert!(!dir.path().join("cmd.pid").exists());
    Ok(())
}

#[tokio::test]
async fn command_ignoring_sigterm_is_killed() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let reporter = RecordingReporter::new();
    let supervisor = real_supervisor(&ConfigFileBuilder::new().build(), &reporter);

    let handle = supervisor.start(&sh(
        dir.path(),
        "trap '' TERM; echo ready; while true; do sleep 1; done",
    ))?;
    with_timeout(wait_for_file_content(&dir.path().join("cmd.log"), "ready")).await;

    let outcome = with_timeout(supervisor.stop(&handle, Duration::from_secs(5))).await;

    assert_eq!(
        outcome,
        StopOutcome {
            state: TerminationState::ConfirmedDead,
            forced: true
        }
    );
    assert_eq!(handle.exit().and_then(|e| e.signal()), Some(9));
    supervisor.retire(handle)?;
    Ok(())
}

#[tokio::test]
async fn descendants_in_the_command_group_are_stopped_too() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let reporter = RecordingReporter::new();
    let mut settings = fast_settings();
    settings.grace_period = Duration::from_secs(2);
    let cfg = ConfigFileBuilder::new().with_settings(settings).build();
    let supervisor = real_supervisor(&cfg, &reporter);

    let child_pid_file = dir.path().join("grandchild.pid");
    let script = format!(
        "sleep 30 & echo $! > '{}'; echo ready; wait",
        child_pid_file.display()
    );
    let handle = supervisor.start(&sh(dir.path(), &script))?;
    with_timeout(wait_for_file_content(&dir.path().join("cmd.log"), "ready")).await;

    let grandchild: u32 = fs::read_to_string(&child_pid_file)?.trim().parse()?;
    assert!(matches!(OsProcessTable.probe(grandchild), ProcessProbe::Alive(_)));

    let outcome = with_timeout(supervisor.stop(&handle, Duration::from_secs(5))).await;
    assert_eq!(outcome.state, TerminationState::ConfirmedDead);
    supervisor.retire(handle)?;

    // The orphan is reaped by whoever adopts it; absent or zombie both count.
    with_timeout(async {
        while matches!(OsProcessTable.probe(grandchild), ProcessProbe::Alive(_)) {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    Ok(())
}
