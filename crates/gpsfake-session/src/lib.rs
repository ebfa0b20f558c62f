//! Session engine for gpsfake.
//!
//! Runs fake GPS devices and client sessions against one instance of the
//! daemon under test:
//!
//! - [`transport`] / [`pty`]: where device records are written
//! - [`feed`]: fake devices and their lifecycle
//! - [`daemon`]: spawning, device registration and termination
//! - [`reader`]: client sessions
//! - [`queue`] / [`scheduler`]: round-robin scheduling of all of the above
//! - [`worker`]: running the scheduler on its own thread

pub mod daemon;
pub mod feed;
#[cfg(target_os = "linux")]
pub mod pty;
pub mod queue;
pub mod reader;
pub mod scheduler;
pub mod transport;
pub mod worker;

pub use daemon::{DaemonControl, DaemonController};
pub use feed::{always, single_pass, DeviceFeed, FeedSource, FeedState, GoPredicate};
#[cfg(target_os = "linux")]
pub use pty::PtyTransport;
pub use queue::{QueueEntry, RunQueue};
pub use reader::{GpsdClient, ReaderConnection, ReaderSession};
pub use scheduler::{RunSummary, SessionHandle, SessionScheduler, TurnOutcome};
pub use transport::{ByteTransport, MemoryTransport, UdpTransport};
pub use worker::SchedulerWorker;
