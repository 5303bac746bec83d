// tests/termination_escalation.rs

use std::error::Error;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use nix::errno::Errno;

use cmdwarden::errors::TerminationError;
use cmdwarden::process::{CommandProcessHandle, TerminationState};
use cmdwarden::process::write_pid_file;
use cmdwarden::supervisor::{StopOutcome, Supervisor, SupervisorEvent};
use cmdwarden::types::TerminationSignal::{Forceful, Graceful};
use cmdwarden_test_utils::builders::{fake_supervisor, fast_settings};
use cmdwarden_test_utils::{Behaviour, FakeProcessTable, RecordingReporter, init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

fn adopt_fake(
    supervisor: &Supervisor,
    table: &FakeProcessTable,
    dir: &Path,
    pid: u32,
    behaviour: Behaviour,
) -> Result<CommandProcessHandle, Box<dyn Error>> {
    table.spawn(pid, behaviour);
    let pid_file = dir.join(format!("{pid}.pid"));
    write_pid_file(&pid_file, pid)?;
    Ok(supervisor.adopt(&pid_file)?)
}

#[tokio::test]
async fn prompt_exit_never_receives_sigkill() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let table = FakeProcessTable::new();
    let reporter = RecordingReporter::new();
    let supervisor = fake_supervisor(fast_settings(), &table, &reporter);

    let handle = adopt_fake(&supervisor, &table, dir.path(), 4101, Behaviour::ExitOnTerm)?;
    let outcome = with_timeout(supervisor.stop(&handle, Duration::from_secs(2))).await;

    assert_eq!(
        outcome,
        StopOutcome {
            state: TerminationState::ConfirmedDead,
            forced: false
        }
    );
    assert_eq!(table.signals_sent(), vec![(4101, Graceful)]);
    assert_eq!(
        reporter.last_terminated(),
        Some(SupervisorEvent::Terminated {
            pid: 4101,
            state: TerminationState::ConfirmedDead,
            forced: false
        })
    );
    Ok(())
}

#[tokio::test]
async fn ignored_sigterm_escalates_after_grace_period() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let table = FakeProcessTable::new();
    let reporter = RecordingReporter::new();
    let settings = fast_settings();
    let grace = settings.grace_period;
    let supervisor = fake_supervisor(settings, &table, &reporter);

    let handle = adopt_fake(&supervisor, &table, dir.path(), 4102, Behaviour::IgnoreTerm)?;
    let started = Instant::now();
    let outcome = with_timeout(supervisor.stop(&handle, Duration::from_secs(2))).await;

    assert!(started.elapsed() >= grace, "SIGKILL sent before the grace period");
    assert_eq!(outcome.state, TerminationState::ConfirmedDead);
    assert!(outcome.forced);
    assert_eq!(table.signals_sent(), vec![(4102, Graceful), (4102, Forceful)]);
    assert!(!table.is_alive(4102));
    Ok(())
}

#[tokio::test]
async fn unkillable_process_is_abandoned_at_the_deadline() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let table = FakeProcessTable::new();
    let reporter = RecordingReporter::new();
    let supervisor = fake_supervisor(fast_settings(), &table, &reporter);

    let handle = adopt_fake(&supervisor, &table, dir.path(), 4103, Behaviour::Unkillable)?;
    let timeout = Duration::from_millis(500);
    let started = Instant::now();
    let outcome = with_timeout(supervisor.stop(&handle, timeout)).await;

    assert!(started.elapsed() < timeout + Duration::from_secs(1));
    assert_eq!(
        outcome,
        StopOutcome {
            state: TerminationState::UnknownAssumedDead,
            forced: true
        }
    );
    assert_eq!(handle.state(), TerminationState::UnknownAssumedDead);
    assert!(table.is_alive(4103));
    assert_eq!(
        reporter.count(|e| matches!(e, SupervisorEvent::Terminated { .. })),
        1
    );
    Ok(())
}

#[tokio::test]
async fn repeated_requests_on_a_dead_process_are_no_ops() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let table = FakeProcessTable::new();
    let reporter = RecordingReporter::new();
    let supervisor = fake_supervisor(fast_settings(), &table, &reporter);

    let handle = adopt_fake(&supervisor, &table, dir.path(), 4104, Behaviour::ExitOnTerm)?;
    table.exit(4104);

    for signal in [Forceful, Graceful, Forceful, Forceful] {
        assert_eq!(
            supervisor.request_termination(&handle, signal)?,
            TerminationState::ConfirmedDead
        );
    }
    assert!(table.signals_sent().is_empty());
    Ok(())
}

#[tokio::test]
async fn graceful_request_after_sigkill_does_not_regress() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let table = FakeProcessTable::new();
    let reporter = RecordingReporter::new();
    let supervisor = fake_supervisor(fast_settings(), &table, &reporter);

    let handle = adopt_fake(&supervisor, &table, dir.path(), 4105, Behaviour::Unkillable)?;

    assert_eq!(
        supervisor.request_termination(&handle, Forceful)?,
        TerminationState::ForceKillRequested
    );
    assert_eq!(
        supervisor.request_termination(&handle, Graceful)?,
        TerminationState::ForceKillRequested
    );
    assert_eq!(table.signals_sent(), vec![(4105, Forceful)]);
    Ok(())
}

#[tokio::test]
async fn signal_errors_are_retried_then_the_process_is_abandoned() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let table = FakeProcessTable::new();
    let reporter = RecordingReporter::new();
    let settings = fast_settings();
    let attempts = settings.max_termination_attempts as usize;
    let supervisor = fake_supervisor(settings, &table, &reporter);

    let handle = adopt_fake(
        &supervisor,
        &table,
        dir.path(),
        4106,
        Behaviour::FailSignals(Errno::EPERM),
    )?;

    match supervisor.request_termination(&handle, Graceful) {
        Err(TerminationError::Signal { pid, errno, .. }) => {
            assert_eq!(pid, 4106);
            assert_eq!(errno, Errno::EPERM);
        }
        other => panic!("expected a signal error, got {other:?}"),
    }
    assert_eq!(handle.state(), TerminationState::SignalRequested);

    let outcome = with_timeout(supervisor.stop(&handle, Duration::from_secs(2))).await;
    assert_eq!(outcome.state, TerminationState::UnknownAssumedDead);

    let sent = table.signals_sent();
    let graceful = sent.iter().filter(|(_, s)| *s == Graceful).count();
    let forceful = sent.iter().filter(|(_, s)| *s == Forceful).count();
    // One graceful attempt came from the direct request above.
    assert_eq!(graceful, 1 + attempts);
    assert_eq!(forceful, attempts);
    Ok(())
}

#[tokio::test]
async fn verified_group_leader_gets_its_group_signalled() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let table = FakeProcessTable::new();
    let reporter = RecordingReporter::new();
    let supervisor = fake_supervisor(fast_settings(), &table, &reporter);

    let handle = adopt_fake(&supervisor, &table, dir.path(), 4107, Behaviour::IgnoreTerm)?;
    table.spawn_in_group(4108, 4107, Behaviour::IgnoreTerm);

    supervisor.request_termination(&handle, Graceful)?;
    assert_eq!(table.group_signals_sent(), vec![(4107, Graceful)]);

    supervisor.request_termination(&handle, Forceful)?;
    assert!(!table.is_alive(4107));
    // Leader went first; the group is only reachable while it is verifiable.
    assert_eq!(table.signals_sent(), vec![(4107, Graceful), (4107, Forceful)]);
    Ok(())
}

#[tokio::test]
async fn unverified_groups_are_never_signalled() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let table = FakeProcessTable::new();
    let reporter = RecordingReporter::new();
    let supervisor = fake_supervisor(fast_settings(), &table, &reporter);

    // Still in the parent's group: setsid has not happened yet.
    table.spawn_in_group(4109, 4000, Behaviour::IgnoreTerm);
    write_pid_file(&dir.path().join("a.pid"), 4109)?;
    let not_leader = supervisor.adopt(&dir.path().join("a.pid"))?;
    supervisor.request_termination(&not_leader, Graceful)?;

    // Leads a group, but it is the supervisor's own.
    table.set_own_process_group(4110);
    let own_group =
        adopt_fake(&supervisor, &table, dir.path(), 4110, Behaviour::IgnoreTerm)?;
    supervisor.request_termination(&own_group, Graceful)?;

    assert!(table.group_signals_sent().is_empty());
    assert_eq!(table.signals_sent(), vec![(4109, Graceful), (4110, Graceful)]);
    Ok(())
}

#[tokio::test]
async fn group_signalling_can_be_disabled() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let table = FakeProcessTable::new();
    let reporter = RecordingReporter::new();
    let mut settings = fast_settings();
    settings.signal_process_group = false;
    let supervisor = fake_supervisor(settings, &table, &reporter);

    let handle = adopt_fake(&supervisor, &table, dir.path(), 4111, Behaviour::IgnoreTerm)?;
    supervisor.request_termination(&handle, Graceful)?;

    assert!(table.group_signals_sent().is_empty());
    assert_eq!(table.signals_sent(), vec![(4111, Graceful)]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_termination_and_polling_agree() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let table = FakeProcessTable::new();
    let reporter = RecordingReporter::new();
    let supervisor = Arc::new(fake_supervisor(fast_settings(), &table, &reporter));

    let handle = Arc::new(adopt_fake(
        &supervisor,
        &table,
        dir.path(),
        4112,
        Behaviour::IgnoreTerm,
    )?);

    let mut tasks = Vec::new();
    for i in 0..16 {
        let supervisor = Arc::clone(&supervisor);
        let handle = Arc::clone(&handle);
        tasks.push(tokio::spawn(async move {
            if i % 2 == 0 {
                supervisor.request_termination(&handle, Forceful).map(|_| ())
            } else {
                let _ = supervisor.poll(&handle);
                Ok(())
            }
        }));
    }
    for task in tasks {
        task.await??;
    }
    let _ = supervisor.poll(&handle);

    assert_eq!(handle.state(), TerminationState::ConfirmedDead);
    // Only the first forceful request found the process alive.
    assert_eq!(table.signals_sent(), vec![(4112, Forceful)]);
    assert_eq!(
        reporter.count(|e| matches!(e, SupervisorEvent::Exited { .. })),
        1
    );
    Ok(())
}
