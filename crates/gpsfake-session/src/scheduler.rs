//! Cooperative round-robin session scheduler.
//!
//! Each turn the scheduler flushes daemon back-talk from every device, then
//! picks the next run-queue entry and gives it one unit of work:
//!
//! 1. A device whose grace interval after exhaustion has passed is drained,
//!    dequeued and deregistered
//! 2. A device whose continuation predicate is false is marked exhausted
//! 3. Any other device feeds one record to its transport
//! 4. A reader session sends its queued commands and reports its responses
//!
//! [`SessionScheduler::run`] repeats turns until no devices remain and the
//! last turn produced no client output, then kills the daemon. Queue
//! mutation from other threads goes through a [`SessionHandle`].

use crate::daemon::{DaemonControl, DaemonController};
use crate::feed::{DeviceFeed, FeedState, GoPredicate};
use crate::queue::{QueueEntry, RunQueue};
use crate::reader::{GpsdClient, ReaderConnection, ReaderSession};
use gpsfake_common::config::{HarnessConfig, PacingConfig};
use gpsfake_common::error::{HarnessError, HarnessResult};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace};

/// Receives every complete client response: `(client id, response)`.
pub type Reporter = Box<dyn FnMut(u32, &str) + Send>;

/// State shared between the scheduler and its handles.
pub(crate) struct SessionShared {
    queue: Mutex<RunQueue>,
    daemon: Mutex<Option<Box<dyn DaemonControl>>>,
    default_predicate: Mutex<Option<GoPredicate>>,
    client_id: AtomicU32,
    stop_requested: AtomicBool,
    pub(crate) threaded: AtomicBool,
}

/// Cloneable handle for adding and removing devices and clients.
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<SessionShared>,
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let queue = self.shared.queue.lock();
        f.debug_struct("SessionHandle")
            .field("writers", &queue.writers())
            .field("readers", &queue.readers())
            .field("stop_requested", &self.stop_requested())
            .finish()
    }
}

impl SessionHandle {
    /// Queue a device and register it with the daemon.
    ///
    /// Adding a device whose name is already queued only repeats the
    /// registration. Returns the device name.
    pub fn add_device(&self, feed: DeviceFeed) -> HarnessResult<String> {
        let name = feed.name().to_string();
        {
            let mut queue = self.shared.queue.lock();
            if queue.find_device(&name).is_none() {
                queue.append(QueueEntry::device(feed));
                debug!(device = %name, writers = queue.writers(), "Device queued");
            }
        }
        if let Some(daemon) = self.shared.daemon.lock().as_mut() {
            daemon.add_device(&name)?;
        }
        Ok(name)
    }

    /// Drain a device, dequeue it and deregister it from the daemon.
    pub fn remove_device(&self, name: &str) -> HarnessResult<()> {
        let device = self
            .shared
            .queue
            .lock()
            .remove_device(name)
            .ok_or_else(|| HarnessError::UnknownDevice(name.to_string()))?;
        device.lock().retire()?;
        if let Some(daemon) = self.shared.daemon.lock().as_mut() {
            daemon.remove_device(name)?;
        }
        info!(device = name, "Device removed");
        Ok(())
    }

    /// Queue a client session on `conn`, returning its id.
    ///
    /// `commands` are sent at once when the scheduler runs on the caller's
    /// thread, or on the session's first turn when it runs on a worker.
    pub fn add_reader(
        &self,
        conn: Box<dyn ReaderConnection>,
        commands: Option<&str>,
    ) -> HarnessResult<u32> {
        let id = self.shared.client_id.fetch_add(1, Ordering::Relaxed) + 1;
        let mut session = ReaderSession::new(id, conn);
        if let Some(commands) = commands.filter(|c| !c.is_empty()) {
            if self.shared.threaded.load(Ordering::Acquire) {
                session.enqueue(commands);
            } else {
                session.send_now(commands)?;
            }
        }
        let mut queue = self.shared.queue.lock();
        queue.append(QueueEntry::reader(session));
        debug!(client = id, readers = queue.readers(), "Client queued");
        Ok(id)
    }

    /// Connect a client to the daemon on `host:port` and queue it.
    pub fn add_client(&self, host: &str, port: u16, commands: Option<&str>) -> HarnessResult<u32> {
        let client = GpsdClient::connect(host, port)
            .map_err(|e| HarnessError::IoError(format!("connect {host}:{port}: {e}")))?;
        self.add_reader(Box::new(client), commands)
    }

    /// Dequeue client `id`. Returns `false` when no such client is queued.
    pub fn remove_reader(&self, id: u32) -> bool {
        let removed = self.shared.queue.lock().remove_reader(id).is_some();
        if removed {
            debug!(client = id, "Client removed");
        }
        removed
    }

    /// Continuation predicate for devices without their own.
    pub fn set_predicate(&self, predicate: GoPredicate) {
        *self.shared.default_predicate.lock() = Some(predicate);
    }

    /// Ask the scheduler to stop after the current turn.
    pub fn request_stop(&self) {
        self.shared.stop_requested.store(true, Ordering::Release);
    }

    /// Whether a stop has been requested.
    pub fn stop_requested(&self) -> bool {
        self.shared.stop_requested.load(Ordering::Acquire)
    }

    /// Do nothing for `duration`.
    pub fn wait(&self, duration: Duration) {
        debug!(?duration, "Waiting");
        thread::sleep(duration);
    }

    /// Let the scheduler collect client output for `duration`.
    pub fn gather(&self, duration: Duration) {
        debug!(?duration, "Gathering");
        thread::sleep(duration);
    }

    /// Devices queued.
    pub fn writers(&self) -> usize {
        self.shared.queue.lock().writers()
    }

    /// Clients queued.
    pub fn readers(&self) -> usize {
        self.shared.queue.lock().readers()
    }

    /// Kill the daemon. Later calls do nothing.
    pub fn shutdown_daemon(&self) -> HarnessResult<()> {
        let daemon = self.shared.daemon.lock().take();
        match daemon {
            Some(mut daemon) => {
                info!("Shutting down daemon");
                daemon.kill()
            }
            None => Ok(()),
        }
    }
}

/// What one scheduling turn did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Nothing queued.
    Idle,
    /// Device fed one record.
    Fed(String),
    /// Device out of input, waiting out its grace interval.
    Exhausted(String),
    /// Device retired and removed.
    Retired(String),
    /// Client serviced.
    Serviced {
        /// Client id.
        id: u32,
        /// Complete responses reported.
        responses: usize,
        /// Whether anything at all was read.
        had_output: bool,
    },
}

impl TurnOutcome {
    /// Whether the turn produced client output.
    pub fn had_output(&self) -> bool {
        matches!(self, Self::Serviced { had_output: true, .. })
    }
}

/// Totals for one [`SessionScheduler::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Turns taken.
    pub turns: u64,
    /// Records written to devices.
    pub records_fed: u64,
    /// Client responses reported.
    pub responses: u64,
    /// Devices retired.
    pub devices_retired: u64,
    /// Whether the run ended on a stop request.
    pub stopped: bool,
}

/// Owns the run queue and drives the session.
pub struct SessionScheduler {
    shared: Arc<SessionShared>,
    reporter: Reporter,
    grace: Duration,
}

impl SessionScheduler {
    /// Scheduler driving `daemon`.
    pub fn new(daemon: Box<dyn DaemonControl>, pacing: &PacingConfig) -> Self {
        let shared = SessionShared {
            queue: Mutex::new(RunQueue::new()),
            daemon: Mutex::new(Some(daemon)),
            default_predicate: Mutex::new(None),
            client_id: AtomicU32::new(0),
            stop_requested: AtomicBool::new(false),
            threaded: AtomicBool::new(false),
        };
        Self {
            shared: Arc::new(shared),
            reporter: Box::new(|_: u32, _: &str| {}),
            grace: pacing.close_delay,
        }
    }

    /// Start a daemon from `config` in the background, wait for it to come
    /// up, and build a scheduler around it.
    pub fn spawn(config: &HarnessConfig) -> HarnessResult<Self> {
        Self::spawn_until(config, || false)
    }

    /// [`spawn`](Self::spawn) that abandons the readiness wait, and kills
    /// the daemon, once `stop` returns true.
    pub fn spawn_until(config: &HarnessConfig, stop: impl Fn() -> bool) -> HarnessResult<Self> {
        let mut daemon = DaemonController::new(&config.daemon, &config.pacing);
        daemon.spawn(config.daemon.port, true)?;
        if let Err(e) = daemon.await_ready_until(stop) {
            daemon.kill()?;
            return Err(e);
        }
        Ok(Self::new(Box::new(daemon), &config.pacing))
    }

    /// Handle for queue mutation.
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub(crate) fn shared(&self) -> &Arc<SessionShared> {
        &self.shared
    }

    /// Where client responses go.
    pub fn set_reporter(&mut self, reporter: impl FnMut(u32, &str) + Send + 'static) {
        self.reporter = Box::new(reporter);
    }

    /// Take one scheduling turn.
    pub fn run_once(&mut self) -> HarnessResult<TurnOutcome> {
        let devices = self.shared.queue.lock().devices();
        for device in devices {
            device.lock().discard_input()?;
        }

        let Some(chosen) = self.shared.queue.lock().choose() else {
            return Ok(TurnOutcome::Idle);
        };

        match chosen {
            QueueEntry::Device { feed: device, .. } => {
                let default = self.shared.default_predicate.lock().clone();
                let mut feed = device.lock();
                let name = feed.name().to_string();
                let now = Instant::now();

                if feed.state() == FeedState::Retired {
                    drop(feed);
                    // Removed by another thread after it was chosen.
                    if !self.shared.queue.lock().contains_device(&device) {
                        return Ok(TurnOutcome::Idle);
                    }
                    return Err(HarnessError::UnknownQueueEntry(format!(
                        "retired device {name}"
                    )));
                }
                if feed.retirement_due(now, self.grace) {
                    drop(feed);
                    self.handle().remove_device(&name)?;
                    Ok(TurnOutcome::Retired(name))
                } else if !feed.should_continue(default.as_ref()) {
                    feed.mark_exhausted(now);
                    Ok(TurnOutcome::Exhausted(name))
                } else {
                    feed.pump()?;
                    Ok(TurnOutcome::Fed(name))
                }
            }
            QueueEntry::Reader { session, .. } => {
                let mut session = session.lock();
                let reporter = &mut self.reporter;
                let mut responses = 0;
                let had_output = session.service(&mut |id: u32, response: &str| {
                    responses += 1;
                    trace!(client = id, response, "Client response");
                    reporter(id, response);
                })?;
                Ok(TurnOutcome::Serviced {
                    id: session.id(),
                    responses,
                    had_output,
                })
            }
        }
    }

    fn run_loop(&mut self, summary: &mut RunSummary) -> HarnessResult<()> {
        loop {
            if self.shared.stop_requested.load(Ordering::Acquire) {
                info!("Stop requested");
                summary.stopped = true;
                return Ok(());
            }
            let outcome = self.run_once()?;
            summary.turns += 1;
            match &outcome {
                TurnOutcome::Fed(_) => summary.records_fed += 1,
                TurnOutcome::Retired(_) => summary.devices_retired += 1,
                TurnOutcome::Serviced { responses, .. } => summary.responses += *responses as u64,
                TurnOutcome::Idle | TurnOutcome::Exhausted(_) => {}
            }
            let writers = self.shared.queue.lock().writers();
            if writers == 0 && !outcome.had_output() {
                debug!(turns = summary.turns, "No writers and no output");
                return Ok(());
            }
        }
    }

    /// Run turns until every device has been retired and the clients have
    /// gone quiet, or a stop is requested.
    ///
    /// The daemon is killed on the way out whatever happened. Starting with
    /// an empty queue returns at once, so queue at least one device or
    /// client first.
    pub fn run(&mut self) -> HarnessResult<RunSummary> {
        info!("Test loop begins");
        let mut summary = RunSummary::default();
        let result = self.run_loop(&mut summary);
        if let Err(e) = &result {
            error!(error = %e, turns = summary.turns, "Test loop failed");
        }
        let cleanup = self.cleanup();
        info!(
            turns = summary.turns,
            records = summary.records_fed,
            responses = summary.responses,
            "Test loop ends"
        );
        result?;
        cleanup?;
        Ok(summary)
    }

    /// Kill the daemon. Safe to call more than once.
    pub fn cleanup(&mut self) -> HarnessResult<()> {
        self.handle().shutdown_daemon()
    }
}
