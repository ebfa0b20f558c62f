//! Threaded mode: the scheduler on a worker thread.
//!
//! Once started, feeds and client polls run on the worker while the caller
//! keeps adding and removing devices and clients through a
//! [`SessionHandle`]. Client commands are then queued and sent on each
//! session's first turn rather than immediately.

use crate::scheduler::{RunSummary, SessionHandle, SessionScheduler};
use gpsfake_common::error::{HarnessError, HarnessResult};
use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

impl SessionScheduler {
    /// Move the scheduler onto a worker thread and start running.
    pub fn start(mut self) -> HarnessResult<SchedulerWorker> {
        self.shared().threaded.store(true, Ordering::Release);
        let handle = self.handle();
        let thread = thread::Builder::new()
            .name("gpsfake-scheduler".into())
            .spawn(move || {
                debug!("Scheduler worker started");
                let result = self.run();
                debug!(ok = result.is_ok(), "Scheduler worker finished");
                result
            })
            .map_err(|e| HarnessError::Worker(format!("failed to spawn scheduler thread: {e}")))?;
        info!("Scheduler running in threaded mode");
        Ok(SchedulerWorker {
            handle,
            thread: Some(thread),
        })
    }
}

/// A scheduler running on its own thread.
#[derive(Debug)]
pub struct SchedulerWorker {
    handle: SessionHandle,
    thread: Option<JoinHandle<HarnessResult<RunSummary>>>,
}

impl SchedulerWorker {
    /// Handle for queue mutation from this thread.
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Whether the worker has exited.
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Wait for the run to end on its own and return its result.
    pub fn join(mut self) -> HarnessResult<RunSummary> {
        self.join_inner()
    }

    /// Ask the run to end, wait for the worker to exit, and return its result.
    pub fn stop(mut self) -> HarnessResult<RunSummary> {
        info!("Stopping scheduler worker");
        self.handle.request_stop();
        self.join_inner()
    }

    fn join_inner(&mut self) -> HarnessResult<RunSummary> {
        let Some(thread) = self.thread.take() else {
            return Err(HarnessError::Worker("scheduler already joined".into()));
        };
        thread
            .join()
            .map_err(|_| HarnessError::Worker("scheduler thread panicked".into()))?
    }
}

impl Drop for SchedulerWorker {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.handle.request_stop();
            if let Err(e) = self.join_inner() {
                warn!(error = %e, "Scheduler worker ended with an error");
            }
        }
    }
}
