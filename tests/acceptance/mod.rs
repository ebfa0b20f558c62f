//! End-to-end tests against a fake daemon.
//!
//! - `daemon_test`: spawning, readiness, liveness and termination
//! - `session_test`: complete sessions through `SessionScheduler::spawn`

mod common;
mod daemon_test;
mod session_test;
