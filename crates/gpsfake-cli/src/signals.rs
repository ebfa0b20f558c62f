//! Signal handling: SIGINT, SIGTERM and SIGQUIT end the session cleanly.
//!
//! The handlers only set an atomic flag. A watcher thread turns the flag
//! into a stop request on the session, so the scheduler finishes its turn
//! and kills the daemon on the way out.

use gpsfake_session::SessionHandle;
use std::os::raw::c_int;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

static STOP_FLAG: AtomicBool = AtomicBool::new(false);
static LAST_SIGNAL: AtomicI32 = AtomicI32::new(0);

const POLL_INTERVAL: Duration = Duration::from_millis(10);

extern "C" fn on_signal(sig: c_int) {
    LAST_SIGNAL.store(sig, Ordering::Relaxed);
    STOP_FLAG.store(true, Ordering::Relaxed);
}

/// Name of a handled signal.
pub fn signal_name(sig: c_int) -> &'static str {
    match sig {
        libc::SIGINT => "SIGINT",
        libc::SIGTERM => "SIGTERM",
        libc::SIGQUIT => "SIGQUIT",
        _ => "signal",
    }
}

/// Whether a stop signal has arrived.
pub fn stop_requested() -> bool {
    STOP_FLAG.load(Ordering::Relaxed)
}

/// Install the handlers.
pub fn install() -> std::io::Result<()> {
    for sig in [libc::SIGINT, libc::SIGTERM, libc::SIGQUIT] {
        // SAFETY: the handler only stores to atomics, which is async-signal-safe.
        let previous = unsafe { libc::signal(sig, on_signal as libc::sighandler_t) };
        if previous == libc::SIG_ERR {
            return Err(std::io::Error::last_os_error());
        }
    }
    debug!("Signal handlers installed");
    Ok(())
}

/// Forward stop signals to `session` from a background thread.
///
/// The thread exits once the session has been asked to stop, whoever asked.
pub fn watch(session: SessionHandle) -> std::io::Result<()> {
    thread::Builder::new()
        .name("gpsfake-signals".into())
        .spawn(move || loop {
            if stop_requested() {
                let sig = LAST_SIGNAL.load(Ordering::Relaxed);
                info!(signal = signal_name(sig), "Stop signal received");
                session.request_stop();
                break;
            }
            if session.stop_requested() {
                break;
            }
            thread::sleep(POLL_INTERVAL);
        })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_names() {
        assert_eq!(signal_name(libc::SIGINT), "SIGINT");
        assert_eq!(signal_name(libc::SIGTERM), "SIGTERM");
        assert_eq!(signal_name(libc::SIGQUIT), "SIGQUIT");
        assert_eq!(signal_name(libc::SIGUSR1), "signal");
    }

    #[test]
    fn test_handler_sets_flag() {
        on_signal(libc::SIGTERM);
        assert!(stop_requested());
        assert_eq!(LAST_SIGNAL.load(Ordering::Relaxed), libc::SIGTERM);
        STOP_FLAG.store(false, Ordering::Relaxed);
    }
}
