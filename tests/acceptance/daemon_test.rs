//! Daemon lifecycle acceptance tests.
//!
//! # Acceptance Criteria
//!
//! - The executable is found through the configured install roots
//! - A background daemon is ready once its pid file parses
//! - `kill` terminates it, removes the pid file and can be repeated
//! - Failed launches surface as errors, never as hangs
//! - A stop during the readiness wait ends it and kills the child

use super::common::{serial, FakeInstall, FAKE_DAEMON};
use gpsfake_common::error::HarnessError;
use gpsfake_session::{DaemonControl, DaemonController, SessionScheduler};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn test_background_daemon_lifecycle() {
    let _guard = serial();
    let install = FakeInstall::healthy();
    let config = install.config();
    let mut daemon = DaemonController::new(&config.daemon, &config.pacing);

    let exe = daemon.resolve_executable().unwrap();
    assert_eq!(exe, install.path().join(FAKE_DAEMON));

    daemon.spawn(config.daemon.port, true).unwrap();
    let pid = daemon.await_ready().unwrap();
    assert!(pid > 0);
    assert_eq!(daemon.pid(), Some(pid));
    assert!(daemon.is_alive());
    assert!(daemon.pid_file().exists());

    daemon.kill().unwrap();
    assert!(!daemon.is_alive());
    assert_eq!(daemon.pid(), None);
    assert!(!daemon.pid_file().exists());

    // Second kill is a no-op.
    daemon.kill().unwrap();
}

#[test]
fn test_registration_without_socket_is_noop() {
    let _guard = serial();
    let install = FakeInstall::healthy();
    let config = install.config();
    let mut daemon = DaemonController::new(&config.daemon, &config.pacing);
    daemon.spawn(config.daemon.port, true).unwrap();
    daemon.await_ready().unwrap();

    // The fake daemon never creates its control socket.
    assert!(!daemon.control_socket().exists());
    daemon.add_device("/dev/pts/99").unwrap();
    daemon.remove_device("/dev/pts/99").unwrap();

    daemon.kill().unwrap();
}

#[test]
fn test_missing_executable() {
    let install = FakeInstall::healthy();
    let mut config = install.config();
    config.daemon.program = "no-such-gpsd-anywhere".into();
    let mut daemon = DaemonController::new(&config.daemon, &config.pacing);

    let err = daemon.spawn(config.daemon.port, true).unwrap_err();
    assert!(matches!(err, HarnessError::ExecutableNotFound { .. }), "{err}");
    assert!(!daemon.is_alive());
}

#[test]
fn test_foreground_failure_is_abnormal_exit() {
    let _guard = serial();
    let install = FakeInstall::failing();
    let config = install.config();
    let mut daemon = DaemonController::new(&config.daemon, &config.pacing);

    let err = daemon.spawn(config.daemon.port, false).unwrap_err();
    assert!(matches!(err, HarnessError::AbnormalExit(_)), "{err}");
}

#[test]
fn test_background_failure_ends_wait() {
    let _guard = serial();
    let install = FakeInstall::failing();
    let config = install.config();
    let mut daemon = DaemonController::new(&config.daemon, &config.pacing);

    daemon.spawn(config.daemon.port, true).unwrap();
    let err = daemon.await_ready().unwrap_err();
    assert!(matches!(err, HarnessError::AbnormalExit(_)), "{err}");
}

#[test]
fn test_stop_during_readiness_wait() {
    let _guard = serial();
    let install = FakeInstall::silent();
    let config = install.config();
    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    let setter = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        flag.store(true, Ordering::Relaxed);
    });

    let started = Instant::now();
    let err = SessionScheduler::spawn_until(&config, || stop.load(Ordering::Relaxed))
        .err()
        .expect("spawn should be interrupted");
    assert!(matches!(err, HarnessError::Interrupted(_)), "{err}");
    assert!(started.elapsed() < Duration::from_secs(10));
    setter.join().unwrap();
}

#[test]
fn test_stopped_wait_kills_child() {
    let _guard = serial();
    let install = FakeInstall::silent();
    let config = install.config();
    let mut daemon = DaemonController::new(&config.daemon, &config.pacing);
    daemon.spawn(config.daemon.port, true).unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    let child = loop {
        if let Some(pid) = install.started_pid() {
            break pid;
        }
        assert!(Instant::now() < deadline, "fake daemon never started");
        thread::sleep(Duration::from_millis(10));
    };

    let err = daemon.await_ready_until(|| true).unwrap_err();
    assert!(matches!(err, HarnessError::Interrupted(_)), "{err}");
    assert_eq!(daemon.pid(), None);

    let check = Command::new("kill")
        .args(["-0", &child.to_string()])
        .stderr(Stdio::null())
        .status()
        .unwrap();
    assert!(!check.success(), "child {child} still running");
    // Nothing left to terminate.
    daemon.kill().unwrap();
}
