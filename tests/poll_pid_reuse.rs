// tests/poll_pid_reuse.rs

use std::error::Error;
use std::time::{Duration, SystemTime};

use cmdwarden::errors::SupervisorError;
use cmdwarden::process::{PollStatus, ProcessExit, TerminationState, write_pid_file};
use cmdwarden::supervisor::SupervisorEvent;
use cmdwarden_test_utils::builders::{fake_supervisor, fast_settings};
use cmdwarden_test_utils::{Behaviour, FakeProcessTable, RecordingReporter, init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

#[tokio::test]
async fn recycled_pid_polls_lost_forever() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let table = FakeProcessTable::new();
    let reporter = RecordingReporter::new();
    let supervisor = fake_supervisor(fast_settings(), &table, &reporter);

    table.spawn(4201, Behaviour::ExitOnTerm);
    let pid_file = dir.path().join("job.pid");
    write_pid_file(&pid_file, 4201)?;
    let handle = supervisor.adopt(&pid_file)?;
    assert_eq!(supervisor.poll(&handle), PollStatus::Running);

    table.exit(4201);
    table.reuse_pid(4201);

    assert_eq!(supervisor.poll(&handle), PollStatus::Lost);
    assert_eq!(supervisor.poll(&handle), PollStatus::Lost);

    // Even once the impostor is gone the original's fate stays unknown.
    table.exit(4201);
    assert_eq!(supervisor.poll(&handle), PollStatus::Lost);

    assert_eq!(handle.state(), TerminationState::UnknownAssumedDead);
    assert_eq!(reporter.count(|e| matches!(e, SupervisorEvent::Lost { .. })), 1);
    assert_eq!(reporter.count(|e| matches!(e, SupervisorEvent::Exited { .. })), 0);
    Ok(())
}

#[tokio::test]
async fn waiting_on_a_recycled_pid_reports_lost_process() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let table = FakeProcessTable::new();
    let reporter = RecordingReporter::new();
    let supervisor = fake_supervisor(fast_settings(), &table, &reporter);

    table.spawn(4202, Behaviour::ExitOnTerm);
    let pid_file = dir.path().join("job.pid");
    write_pid_file(&pid_file, 4202)?;
    let handle = supervisor.adopt(&pid_file)?;

    let waiter = supervisor.wait(&handle);
    let recycle = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        table.exit(4202);
        table.reuse_pid(4202);
    };
    let (result, ()) = with_timeout(async { tokio::join!(waiter, recycle) }).await;

    match result {
        Err(SupervisorError::LostProcess { pid }) => assert_eq!(pid, 4202),
        other => panic!("expected LostProcess, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn recycled_pid_is_never_signalled() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let table = FakeProcessTable::new();
    let reporter = RecordingReporter::new();
    let supervisor = fake_supervisor(fast_settings(), &table, &reporter);

    table.spawn(4203, Behaviour::ExitOnTerm);
    let pid_file = dir.path().join("job.pid");
    write_pid_file(&pid_file, 4203)?;
    let handle = supervisor.adopt(&pid_file)?;

    table.exit(4203);
    table.reuse_pid(4203);

    let outcome = with_timeout(supervisor.stop(&handle, Duration::from_secs(1))).await;

    assert_eq!(outcome.state, TerminationState::UnknownAssumedDead);
    assert!(!outcome.forced);
    assert!(table.signals_sent().is_empty());
    assert!(table.group_signals_sent().is_empty());
    assert!(table.is_alive(4203), "the unrelated process must survive");
    Ok(())
}

#[tokio::test]
async fn adopted_process_exit_has_unknown_status() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let table = FakeProcessTable::new();
    let reporter = RecordingReporter::new();
    let supervisor = fake_supervisor(fast_settings(), &table, &reporter);

    table.spawn(4204, Behaviour::ExitOnTerm);
    let pid_file = dir.path().join("job.pid");
    write_pid_file(&pid_file, 4204)?;
    let handle = supervisor.adopt(&pid_file)?;
    assert!(handle.is_adopted());
    assert!(handle.log_sink().is_none());

    table.exit(4204);

    let exit = with_timeout(supervisor.wait(&handle)).await?;
    assert_eq!(exit, ProcessExit::unknown());
    assert_eq!(exit.code(), None);
    assert_eq!(handle.state(), TerminationState::ConfirmedDead);

    supervisor.retire(handle)?;
    assert!(!pid_file.exists());
    Ok(())
}

#[tokio::test]
async fn adopting_a_stale_pid_file_finds_the_process_gone() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let table = FakeProcessTable::new();
    let reporter = RecordingReporter::new();
    let supervisor = fake_supervisor(fast_settings(), &table, &reporter);

    let pid_file = dir.path().join("stale.pid");
    write_pid_file(&pid_file, 4205)?;
    let handle = supervisor.adopt(&pid_file)?;

    assert_eq!(
        supervisor.poll(&handle),
        PollStatus::Exited(ProcessExit::unknown())
    );
    Ok(())
}

#[tokio::test]
async fn retire_refuses_a_running_process_and_returns_the_handle() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let table = FakeProcessTable::new();
    let reporter = RecordingReporter::new();
    let supervisor = fake_supervisor(fast_settings(), &table, &reporter);

    table.spawn(4206, Behaviour::IgnoreTerm);
    let pid_file = dir.path().join("job.pid");
    write_pid_file(&pid_file, 4206)?;
    let handle = supervisor.adopt(&pid_file)?;

    let handle = match supervisor.retire(handle) {
        Err(SupervisorError::StillRunning(handle)) => *handle,
        other => panic!("expected StillRunning, got {other:?}"),
    };
    assert!(pid_file.exists());

    table.exit(4206);
    supervisor.retire(handle)?;
    assert!(!pid_file.exists());
    Ok(())
}

#[tokio::test]
async fn garbage_pid_file_cannot_be_adopted() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let table = FakeProcessTable::new();
    let reporter = RecordingReporter::new();
    let supervisor = fake_supervisor(fast_settings(), &table, &reporter);

    let pid_file = dir.path().join("bad.pid");
    std::fs::write(&pid_file, "not-a-pid")?;

    assert!(matches!(
        supervisor.adopt(&pid_file),
        Err(SupervisorError::InvalidPidFile { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn pid_taken_after_the_pid_file_was_written_is_never_signalled() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let table = FakeProcessTable::new();
    let reporter = RecordingReporter::new();
    let supervisor = fake_supervisor(fast_settings(), &table, &reporter);

    // The worker died, its command exited, and the pid was handed out again.
    let pid_file = dir.path().join("job.pid");
    write_pid_file(&pid_file, 4207)?;
    table.reuse_pid_at(4207, SystemTime::now() + Duration::from_secs(60));

    let handle = supervisor.adopt(&pid_file)?;
    assert_eq!(supervisor.poll(&handle), PollStatus::Lost);

    let outcome = with_timeout(supervisor.stop(&handle, Duration::from_secs(1))).await;
    assert_eq!(outcome.state, TerminationState::UnknownAssumedDead);
    assert!(table.signals_sent().is_empty());
    assert!(table.group_signals_sent().is_empty());
    assert!(table.is_alive(4207));

    supervisor.retire(handle)?;
    assert!(!pid_file.exists());
    Ok(())
}

#[tokio::test]
async fn process_older_than_its_pid_file_is_adopted() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let table = FakeProcessTable::new();
    let reporter = RecordingReporter::new();
    let supervisor = fake_supervisor(fast_settings(), &table, &reporter);

    table.reuse_pid_at(4208, SystemTime::now() - Duration::from_secs(60));
    let pid_file = dir.path().join("job.pid");
    write_pid_file(&pid_file, 4208)?;

    let handle = supervisor.adopt(&pid_file)?;
    assert_eq!(supervisor.poll(&handle), PollStatus::Running);

    let outcome = with_timeout(supervisor.stop(&handle, Duration::from_secs(1))).await;
    assert_eq!(outcome.state, TerminationState::ConfirmedDead);
    assert!(!table.is_alive(4208));
    Ok(())
}
