//! Common utilities for the acceptance tests.
//!
//! Provides helpers for:
//! - Installing a fake daemon executable into a scratch directory
//! - Building a harness configuration that finds it
//! - Serialising tests that fork

#![allow(dead_code)] // Not every test module uses every helper

use gpsfake_common::config::HarnessConfig;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tempfile::TempDir;

/// Name the fake daemon is installed under.
pub const FAKE_DAEMON: &str = "fake-gpsd";

/// Writes its pid file (the argument after `-P`) and sleeps until killed.
const HEALTHY_SCRIPT: &str = r#"#!/bin/sh
pidfile=""
while [ $# -gt 0 ]; do
    case "$1" in
        -P) pidfile="$2"; shift ;;
    esac
    shift
done
[ -n "$pidfile" ] || exit 2
echo $$ > "$pidfile"
exec sleep 30
"#;

/// Fails before writing anything.
const FAILING_SCRIPT: &str = "#!/bin/sh\nexit 3\n";

/// Never writes its pid file; leaves its real pid next to itself instead.
const SILENT_SCRIPT: &str = "#!/bin/sh\necho $$ > \"$0.started\"\nexec sleep 30\n";

static FORK_LOCK: Mutex<()> = Mutex::new(());

/// Hold while writing and running scripts.
///
/// A script still open for writing in one thread cannot be executed by a
/// child forked from another (ETXTBSY).
pub fn serial() -> MutexGuard<'static, ()> {
    FORK_LOCK.lock().unwrap_or_else(|e| e.into_inner())
}

/// Scratch directory with a fake daemon installed in it.
pub struct FakeInstall {
    /// Holds the install and scratch files.
    pub dir: TempDir,
}

impl FakeInstall {
    /// Install a daemon that comes up and waits to be killed.
    pub fn healthy() -> Self {
        Self::with_script(HEALTHY_SCRIPT)
    }

    /// Install a daemon that exits with status 3.
    pub fn failing() -> Self {
        Self::with_script(FAILING_SCRIPT)
    }

    /// Install a daemon that never becomes ready.
    pub fn silent() -> Self {
        Self::with_script(SILENT_SCRIPT)
    }

    fn with_script(script: &str) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let exe = dir.path().join(FAKE_DAEMON);
        fs::write(&exe, script).expect("write fake daemon");
        fs::set_permissions(&exe, fs::Permissions::from_mode(0o755)).expect("chmod");
        Self { dir }
    }

    /// Pid the silent daemon recorded, once it has started.
    pub fn started_pid(&self) -> Option<u32> {
        let marker = self.path().join(format!("{FAKE_DAEMON}.started"));
        fs::read_to_string(marker).ok()?.trim().parse().ok()
    }

    /// Directory holding the executable and scratch files.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Configuration that finds the fake daemon, with fast pacing.
    pub fn config(&self) -> HarnessConfig {
        let mut config = HarnessConfig::default();
        config.daemon.program = FAKE_DAEMON.into();
        config.daemon.install_roots = vec![self.path().to_path_buf()];
        config.daemon.scratch_dir = self.path().to_path_buf();
        config.pacing.write_pad = Duration::ZERO;
        config.pacing.close_delay = Duration::from_millis(200);
        config.pacing.ready_retry = Duration::from_millis(10);
        config.pacing.ready_reparse = Duration::from_millis(10);
        config.pacing.kill_interval = Duration::from_millis(5);
        config
    }
}

/// A small textual capture in the digester's input format.
pub const CAPTURE: &str = "\
# Name: acceptance
$GPRMC,073123.000,A,5742.434,N,1141.713,E,1.00,0.00,280511,,,S*41\r
$GPRMC,073124.000,A,5742.434,N,1141.713,E,1.00,0.00,280511,,,S*40\r
$GPRMC,073125.000,A,5742.434,N,1141.713,E,1.00,0.00,280511,,,S*43\r
";
