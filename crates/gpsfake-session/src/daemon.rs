//! Lifecycle control for the daemon under test.
//!
//! The controller finds the daemon executable, starts it listening on a
//! private control socket and pid file, waits for the pid file to appear,
//! registers fake devices over the control socket, and terminates it.
//!
//! Control-socket requests are one line each on a fresh connection:
//! `+<device>\r\n\0` to add a device, `-<device>\r\n\0` to remove one. The
//! daemon answers with a short acknowledgement that is read and discarded.

use gpsfake_common::config::{DaemonConfig, PacingConfig};
use gpsfake_common::error::{HarnessError, HarnessResult};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::{access, AccessFlags, Pid};
use std::ffi::OsString;
use std::fs;
use std::io::{ErrorKind, Read, Write};
use std::os::unix::net::UnixStream;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus};
use std::thread;
use tracing::{debug, info, trace, warn};

/// Size of the control-socket acknowledgement.
pub const ACK_LEN: usize = 12;

/// What the scheduler needs from a daemon.
pub trait DaemonControl: Send {
    /// Tell the daemon about a new device.
    fn add_device(&mut self, path: &str) -> HarnessResult<()>;

    /// Tell the daemon a device is gone.
    fn remove_device(&mut self, path: &str) -> HarnessResult<()>;

    /// Whether the daemon process still exists.
    fn is_alive(&self) -> bool;

    /// Terminate the daemon. Calling it again is a no-op.
    fn kill(&mut self) -> HarnessResult<()>;
}

/// Directories searched for the daemon executable, in order.
///
/// Configured install roots come first, then the colon-separated roots in
/// `home` (the override environment variable), then `path` with `fallback`
/// appended when it is not already listed.
pub fn search_dirs(
    config: &DaemonConfig,
    home: Option<OsString>,
    path: Option<OsString>,
) -> Vec<PathBuf> {
    let mut dirs = config.install_roots.clone();
    if let Some(home) = home {
        dirs.extend(std::env::split_paths(&home).filter(|p| !p.as_os_str().is_empty()));
    }
    let mut system: Vec<PathBuf> = path
        .map(|path| std::env::split_paths(&path).collect())
        .unwrap_or_default();
    if !system.contains(&config.fallback_dir) {
        system.push(config.fallback_dir.clone());
    }
    dirs.extend(system);
    dirs
}

fn is_executable(candidate: &Path) -> bool {
    candidate.is_file() && access(candidate, AccessFlags::X_OK).is_ok()
}

fn describe(status: ExitStatus) -> String {
    match (status.signal(), status.code()) {
        (Some(sig), _) => format!("terminated by signal {sig}"),
        (None, Some(code)) => format!("exit status {code}"),
        (None, None) => status.to_string(),
    }
}

/// Handle on one daemon instance.
#[derive(Debug)]
pub struct DaemonController {
    config: DaemonConfig,
    pacing: PacingConfig,
    control_socket: PathBuf,
    pid_file: PathBuf,
    pid: Option<Pid>,
    child: Option<Child>,
}

impl DaemonController {
    /// Controller with scratch files named after this process.
    pub fn new(config: &DaemonConfig, pacing: &PacingConfig) -> Self {
        let me = std::process::id();
        Self::with_paths(
            config,
            pacing,
            config.scratch_dir.join(format!("gpsfake-{me}.sock")),
            config.scratch_dir.join(format!("gpsfake_pid-{me}")),
        )
    }

    /// Controller with explicit control-socket and pid-file paths.
    pub fn with_paths(
        config: &DaemonConfig,
        pacing: &PacingConfig,
        control_socket: PathBuf,
        pid_file: PathBuf,
    ) -> Self {
        Self {
            config: config.clone(),
            pacing: pacing.clone(),
            control_socket,
            pid_file,
            pid: None,
            child: None,
        }
    }

    /// Control-socket path handed to the daemon.
    pub fn control_socket(&self) -> &Path {
        &self.control_socket
    }

    /// Pid-file path handed to the daemon.
    pub fn pid_file(&self) -> &Path {
        &self.pid_file
    }

    /// Daemon pid, once [`await_ready`](Self::await_ready) has seen it.
    pub fn pid(&self) -> Option<i32> {
        self.pid.map(Pid::as_raw)
    }

    /// Locate the daemon executable.
    pub fn resolve_executable(&self) -> HarnessResult<PathBuf> {
        let dirs = search_dirs(
            &self.config,
            std::env::var_os(&self.config.home_env),
            std::env::var_os("PATH"),
        );
        dirs.iter()
            .map(|dir| dir.join(&self.config.program))
            .find(|candidate| is_executable(candidate))
            .ok_or_else(|| HarnessError::ExecutableNotFound {
                program: self.config.program.clone(),
                env_var: self.config.home_env.clone(),
            })
    }

    /// Full invocation for `executable` listening on `port`.
    pub fn command(&self, executable: &Path, port: u16) -> Command {
        let mut cmd = match self.config.prefix.split_first() {
            Some((wrapper, wrapper_args)) => {
                let mut cmd = Command::new(wrapper);
                cmd.args(wrapper_args).arg(executable);
                cmd
            }
            None => Command::new(executable),
        };
        cmd.arg("-b")
            .arg("-N")
            .arg("-S")
            .arg(port.to_string())
            .arg("-F")
            .arg(&self.control_socket)
            .arg("-P")
            .arg(&self.pid_file)
            .args(&self.config.options);
        cmd
    }

    /// Start the daemon.
    ///
    /// In the foreground the call returns when the command exits, failing
    /// with [`HarnessError::AbnormalExit`] on a signal or nonzero status. In
    /// the background the child is kept for [`kill`](DaemonControl::kill).
    pub fn spawn(&mut self, port: u16, background: bool) -> HarnessResult<()> {
        let executable = self.resolve_executable()?;
        let mut cmd = self.command(&executable, port);
        info!(
            executable = %executable.display(),
            port,
            background,
            control_socket = %self.control_socket.display(),
            "Spawning daemon"
        );

        if background {
            let child = cmd
                .spawn()
                .map_err(|e| HarnessError::IoError(format!("{}: {e}", executable.display())))?;
            debug!(child = child.id(), "Daemon started in background");
            self.child = Some(child);
            return Ok(());
        }

        let status = cmd
            .status()
            .map_err(|e| HarnessError::IoError(format!("{}: {e}", executable.display())))?;
        if status.success() {
            Ok(())
        } else {
            Err(HarnessError::AbnormalExit(describe(status)))
        }
    }

    /// Block until the daemon has written its pid file.
    ///
    /// A missing file is retried quickly, unparsable content (a write in
    /// progress) more slowly. Only a positive pid is accepted: `0` and
    /// negative values would make `kill` signal whole process groups. There
    /// is no timeout, but a background child that fails while we wait is
    /// reported as [`HarnessError::AbnormalExit`].
    pub fn await_ready(&mut self) -> HarnessResult<i32> {
        self.await_ready_until(|| false)
    }

    /// [`await_ready`](Self::await_ready) that gives up once `stop` returns
    /// true, terminating whatever was spawned and returning
    /// [`HarnessError::Interrupted`].
    pub fn await_ready_until(&mut self, stop: impl Fn() -> bool) -> HarnessResult<i32> {
        loop {
            if stop() {
                info!("Stop requested while waiting for the daemon");
                self.terminate()?;
                return Err(HarnessError::Interrupted(
                    "waiting for the daemon pid file".into(),
                ));
            }
            let text = match fs::read_to_string(&self.pid_file) {
                Ok(text) => text,
                Err(_) => {
                    self.check_child()?;
                    thread::sleep(self.pacing.ready_retry);
                    continue;
                }
            };
            match text.trim().parse::<i32>() {
                Ok(pid) if pid > 0 => {
                    info!(pid, "Daemon ready");
                    self.pid = Some(Pid::from_raw(pid));
                    return Ok(pid);
                }
                _ => {
                    trace!(content = %text.trim(), "Pid file not complete yet");
                    self.check_child()?;
                    thread::sleep(self.pacing.ready_reparse);
                }
            }
        }
    }

    fn check_child(&mut self) -> HarnessResult<()> {
        if let Some(child) = self.child.as_mut() {
            if let Some(status) = child.try_wait()? {
                self.child = None;
                if !status.success() {
                    return Err(HarnessError::AbnormalExit(describe(status)));
                }
                debug!("Daemon launcher exited cleanly, still waiting for pid file");
            }
        }
        Ok(())
    }

    fn control(&self, verb: char, device: &str) -> HarnessResult<()> {
        if !self.control_socket.exists() {
            debug!(device, "No control socket yet, skipping registration");
            return Ok(());
        }
        let socket_err = |e: std::io::Error| {
            HarnessError::ControlSocket(format!("{}: {e}", self.control_socket.display()))
        };

        let mut stream = UnixStream::connect(&self.control_socket).map_err(socket_err)?;
        stream
            .write_all(format!("{verb}{device}\r\n\0").as_bytes())
            .map_err(socket_err)?;
        let mut ack = [0u8; ACK_LEN];
        let n = stream.read(&mut ack).map_err(socket_err)?;
        debug!(
            device,
            verb = %verb,
            ack = %String::from_utf8_lossy(&ack[..n]).trim_end(),
            "Control socket exchange"
        );
        Ok(())
    }

    /// Register a device over the control socket.
    pub fn register_device(&self, device: &str) -> HarnessResult<()> {
        self.control('+', device)
    }

    /// Deregister a device over the control socket.
    pub fn deregister_device(&self, device: &str) -> HarnessResult<()> {
        self.control('-', device)
    }

    fn reap_child(&mut self) {
        if let Some(child) = self.child.as_mut() {
            match child.try_wait() {
                Ok(Some(status)) => {
                    debug!(status = %describe(status), "Daemon child reaped");
                    self.child = None;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "Failed to poll daemon child");
                    self.child = None;
                }
            }
        }
    }

    fn terminate(&mut self) -> HarnessResult<()> {
        if let Some(pid) = self.pid.take() {
            info!(pid = pid.as_raw(), "Terminating daemon");
            loop {
                // Reap first: a zombie child still answers signal 0.
                self.reap_child();
                match signal::kill(pid, Signal::SIGTERM) {
                    Ok(()) => thread::sleep(self.pacing.kill_interval),
                    Err(Errno::ESRCH) => break,
                    Err(e) => {
                        return Err(HarnessError::IoError(format!(
                            "kill {}: {e}",
                            pid.as_raw()
                        )))
                    }
                }
            }
        }

        // A child that never reported a pid (or a prefix wrapper) goes too.
        if let Some(mut child) = self.child.take() {
            if let Ok(None) = child.try_wait() {
                let _ = child.kill();
                let _ = child.wait();
            }
        }

        match fs::remove_file(&self.pid_file) {
            Err(e) if e.kind() != ErrorKind::NotFound => {
                warn!(path = %self.pid_file.display(), error = %e, "Failed to remove pid file")
            }
            _ => {}
        }
        Ok(())
    }
}

impl DaemonControl for DaemonController {
    fn add_device(&mut self, path: &str) -> HarnessResult<()> {
        self.register_device(path)
    }

    fn remove_device(&mut self, path: &str) -> HarnessResult<()> {
        self.deregister_device(path)
    }

    fn is_alive(&self) -> bool {
        self.pid
            .is_some_and(|pid| signal::kill(pid, None::<Signal>).is_ok())
    }

    fn kill(&mut self) -> HarnessResult<()> {
        self.terminate()
    }
}

impl Drop for DaemonController {
    fn drop(&mut self) {
        if self.pid.is_some() || self.child.is_some() {
            if let Err(e) = self.terminate() {
                warn!(error = %e, "Failed to terminate daemon on drop");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufRead;
    use std::os::unix::net::UnixListener;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn controller(dir: &Path) -> DaemonController {
        let config = DaemonConfig {
            program: "gpsfake-no-such-daemon".into(),
            install_roots: vec![dir.to_path_buf()],
            ..DaemonConfig::default()
        };
        DaemonController::with_paths(
            &config,
            &PacingConfig::default(),
            dir.join("control.sock"),
            dir.join("daemon.pid"),
        )
    }

    #[test]
    fn test_search_order() {
        let config = DaemonConfig {
            install_roots: vec![PathBuf::from("/opt/gpsd")],
            ..DaemonConfig::default()
        };
        let dirs = search_dirs(
            &config,
            Some("/home/a:/home/b".into()),
            Some("/usr/bin:/bin".into()),
        );
        let expected: Vec<PathBuf> = [
            "/opt/gpsd",
            "/home/a",
            "/home/b",
            "/usr/bin",
            "/bin",
            "/usr/sbin",
        ]
        .iter()
        .map(PathBuf::from)
        .collect();
        assert_eq!(dirs, expected);
    }

    #[test]
    fn test_fallback_not_duplicated() {
        let dirs = search_dirs(&DaemonConfig::default(), None, Some("/usr/sbin:/bin".into()));
        assert_eq!(dirs, vec![PathBuf::from("/usr/sbin"), PathBuf::from("/bin")]);
    }

    #[test]
    fn test_executable_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = controller(dir.path()).resolve_executable().unwrap_err();
        assert!(matches!(err, HarnessError::ExecutableNotFound { .. }));
    }

    #[test]
    fn test_command_line() {
        let dir = tempfile::tempdir().unwrap();
        let config = DaemonConfig {
            options: vec!["-D".into(), "2".into()],
            prefix: vec!["valgrind".into(), "--quiet".into()],
            ..DaemonConfig::default()
        };
        let ctl = DaemonController::with_paths(
            &config,
            &PacingConfig::default(),
            dir.path().join("s.sock"),
            dir.path().join("p.pid"),
        );
        let cmd = ctl.command(Path::new("/usr/sbin/gpsd"), 2947);
        assert_eq!(cmd.get_program(), "valgrind");
        let args: Vec<String> = cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        let sock = dir.path().join("s.sock").display().to_string();
        let pid = dir.path().join("p.pid").display().to_string();
        assert_eq!(
            args,
            vec![
                "--quiet",
                "/usr/sbin/gpsd",
                "-b",
                "-N",
                "-S",
                "2947",
                "-F",
                sock.as_str(),
                "-P",
                pid.as_str(),
                "-D",
                "2",
            ]
        );
    }

    #[test]
    fn test_registration_without_socket_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let ctl = controller(dir.path());
        ctl.register_device("/dev/pts/9").unwrap();
        ctl.deregister_device("/dev/pts/9").unwrap();
    }

    #[test]
    fn test_control_socket_exchange() {
        let dir = tempfile::tempdir().unwrap();
        let ctl = controller(dir.path());
        let listener = UnixListener::bind(ctl.control_socket()).unwrap();

        let server = thread::spawn(move || {
            let mut requests = Vec::new();
            for _ in 0..2 {
                let (stream, _) = listener.accept().unwrap();
                let mut reader = std::io::BufReader::new(stream);
                let mut request = Vec::new();
                reader.read_until(b'\0', &mut request).unwrap();
                reader.get_mut().write_all(b"OK\n").unwrap();
                requests.push(request);
            }
            requests
        });

        ctl.register_device("/dev/pts/5").unwrap();
        ctl.deregister_device("/dev/pts/5").unwrap();
        let requests = server.join().unwrap();
        assert_eq!(requests[0], b"+/dev/pts/5\r\n\0");
        assert_eq!(requests[1], b"-/dev/pts/5\r\n\0");
    }

    #[test]
    fn test_kill_twice_without_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctl = controller(dir.path());
        assert!(!ctl.is_alive());
        ctl.kill().unwrap();
        ctl.kill().unwrap();
        assert_eq!(ctl.pid(), None);
    }

    #[test]
    fn test_await_ready_parses_pid_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctl = controller(dir.path());
        fs::write(ctl.pid_file(), "4242\n").unwrap();
        assert_eq!(ctl.await_ready().unwrap(), 4242);
        assert_eq!(ctl.pid(), Some(4242));
        // Not ours to kill.
        ctl.pid = None;
    }

    fn fast_controller(dir: &Path) -> DaemonController {
        let pacing = PacingConfig {
            ready_retry: Duration::from_millis(5),
            ready_reparse: Duration::from_millis(5),
            ..PacingConfig::default()
        };
        DaemonController::with_paths(
            &DaemonConfig::default(),
            &pacing,
            dir.join("control.sock"),
            dir.join("daemon.pid"),
        )
    }

    /// Replace the pid file with `content` after `delay`.
    fn rewrite_later(path: PathBuf, delay: Duration, content: &'static str) -> thread::JoinHandle<()> {
        thread::spawn(move || {
            thread::sleep(delay);
            fs::write(path, content).unwrap();
        })
    }

    #[test]
    fn test_await_ready_retries_partial_write() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctl = fast_controller(dir.path());
        fs::write(ctl.pid_file(), "42x").unwrap();
        let writer = rewrite_later(ctl.pid_file().to_path_buf(), Duration::from_millis(50), "4243\n");

        assert_eq!(ctl.await_ready().unwrap(), 4243);
        writer.join().unwrap();
        ctl.pid = None;
    }

    #[test]
    fn test_await_ready_rejects_non_positive_pids() {
        for bad in ["0\n", "-1\n"] {
            let dir = tempfile::tempdir().unwrap();
            let mut ctl = fast_controller(dir.path());
            fs::write(ctl.pid_file(), bad).unwrap();
            let writer =
                rewrite_later(ctl.pid_file().to_path_buf(), Duration::from_millis(50), "4244\n");

            assert_eq!(ctl.await_ready().unwrap(), 4244, "accepted {bad:?}");
            assert_eq!(ctl.pid(), Some(4244));
            writer.join().unwrap();
            ctl.pid = None;
        }
    }

    #[test]
    fn test_await_ready_stops_on_request() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctl = fast_controller(dir.path());
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let setter = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            flag.store(true, Ordering::Relaxed);
        });

        let err = ctl
            .await_ready_until(|| stop.load(Ordering::Relaxed))
            .unwrap_err();
        assert!(matches!(err, HarnessError::Interrupted(_)), "{err}");
        assert_eq!(ctl.pid(), None);
        setter.join().unwrap();
    }
}
