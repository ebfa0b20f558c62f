//! Fake devices: a record source bound to a byte transport.
//!
//! A [`DeviceFeed`] produces one record per scheduling turn, either the next
//! line of a digested capture (cycled forever) or a freshly simulated RMC
//! fix. A continuation predicate decides when the device has said enough;
//! from then on it goes through the lifecycle
//!
//! ```text
//! Active ──predicate false──▶ Exhausted(t) ──grace elapsed──▶ Retired
//! ```

use crate::transport::ByteTransport;
use gpsfake_common::error::HarnessResult;
use gpsfake_nmea::capture::Capture;
use gpsfake_nmea::navigation::NavigationModel;
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

/// Continuation predicate: `(records fed so far, device) -> keep going`.
pub type GoPredicate = Arc<dyn Fn(usize, &DeviceFeed) -> bool + Send + Sync>;

/// Predicate that never stops a device.
pub fn always() -> GoPredicate {
    Arc::new(|_: usize, _: &DeviceFeed| true)
}

/// Predicate that stops a replay device after one pass over its capture.
///
/// Simulated devices have no natural end and are never stopped by it.
pub fn single_pass() -> GoPredicate {
    Arc::new(|index: usize, feed: &DeviceFeed| {
        feed.record_count().map_or(true, |count| index < count)
    })
}

/// Replays a digested capture, cycling back to the start at the end.
#[derive(Debug, Clone)]
pub struct ReplaySource {
    capture: Capture,
    cursor: usize,
    write_pad: Duration,
}

impl ReplaySource {
    /// Replay `capture`, pausing `write_pad` after each record.
    pub fn new(capture: Capture, write_pad: Duration) -> Self {
        Self {
            capture,
            cursor: 0,
            write_pad,
        }
    }

    /// The capture being replayed.
    pub fn capture(&self) -> &Capture {
        &self.capture
    }

    fn next_record(&mut self) -> Vec<u8> {
        let Some(record) = self.capture.record(self.cursor) else {
            return Vec::new();
        };
        if let Some(delay) = record.delay() {
            debug!(capture = %self.capture.name, ?delay, "Delay directive");
            thread::sleep(delay);
        }
        let bytes = record.bytes().to_vec();
        trace!(
            capture = %self.capture.name,
            index = self.cursor,
            len = bytes.len(),
            record = %String::from_utf8_lossy(&bytes).trim_end(),
            "Feeding record"
        );
        if !self.write_pad.is_zero() {
            thread::sleep(self.write_pad);
        }
        self.cursor += 1;
        bytes
    }
}

/// Where a device's records come from.
#[derive(Debug, Clone)]
pub enum FeedSource {
    /// Recorded session.
    Replay(ReplaySource),
    /// Dead-reckoning simulator.
    Simulation(NavigationModel),
}

/// Device lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    /// Feeding.
    Active,
    /// Predicate went false at this instant; waiting out the grace interval.
    Exhausted(Instant),
    /// Drained and no longer fed.
    Retired,
}

/// A fake GPS.
pub struct DeviceFeed {
    transport: Box<dyn ByteTransport>,
    source: FeedSource,
    index: usize,
    predicate: Option<GoPredicate>,
    state: FeedState,
}

impl fmt::Debug for DeviceFeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceFeed")
            .field("name", &self.name())
            .field("index", &self.index)
            .field("state", &self.state)
            .field("has_predicate", &self.predicate.is_some())
            .finish()
    }
}

impl DeviceFeed {
    /// Bind `source` to `transport`.
    pub fn new(source: FeedSource, transport: Box<dyn ByteTransport>) -> Self {
        let feed = Self {
            transport,
            source,
            index: 0,
            predicate: None,
            state: FeedState::Active,
        };
        match &feed.source {
            FeedSource::Replay(replay) => info!(
                device = feed.name(),
                capture = %replay.capture.name,
                records = replay.capture.len(),
                "Replay device created"
            ),
            FeedSource::Simulation(_) => info!(device = feed.name(), "Simulated device created"),
        }
        feed
    }

    /// Device replaying `capture`.
    pub fn replay(capture: Capture, write_pad: Duration, transport: Box<dyn ByteTransport>) -> Self {
        Self::new(
            FeedSource::Replay(ReplaySource::new(capture, write_pad)),
            transport,
        )
    }

    /// Device driven by a navigation model.
    pub fn simulated(model: NavigationModel, transport: Box<dyn ByteTransport>) -> Self {
        Self::new(FeedSource::Simulation(model), transport)
    }

    /// Device name, as registered with the daemon.
    pub fn name(&self) -> &str {
        self.transport.name()
    }

    /// Records fed so far.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Records in one pass of the source; `None` for simulated devices.
    pub fn record_count(&self) -> Option<usize> {
        match &self.source {
            FeedSource::Replay(replay) => Some(replay.capture.len()),
            FeedSource::Simulation(_) => None,
        }
    }

    /// The record source.
    pub fn source(&self) -> &FeedSource {
        &self.source
    }

    /// Lifecycle state.
    pub fn state(&self) -> FeedState {
        self.state
    }

    /// Override the session-wide continuation predicate for this device.
    pub fn set_predicate(&mut self, predicate: GoPredicate) {
        self.predicate = Some(predicate);
    }

    /// Whether this device has its own predicate.
    pub fn has_predicate(&self) -> bool {
        self.predicate.is_some()
    }

    /// Evaluate the device's predicate, falling back to `default`.
    pub fn should_continue(&self, default: Option<&GoPredicate>) -> bool {
        match self.predicate.as_ref().or(default) {
            Some(predicate) => (**predicate)(self.index, self),
            None => true,
        }
    }

    /// Record that the device ran out of input. Only the first call counts.
    pub fn mark_exhausted(&mut self, now: Instant) {
        if self.state == FeedState::Active {
            info!(device = self.name(), records = self.index, "Device ran out of input");
            self.state = FeedState::Exhausted(now);
        }
    }

    /// True once the device has been exhausted for longer than `grace`.
    pub fn retirement_due(&self, now: Instant, grace: Duration) -> bool {
        match self.state {
            FeedState::Exhausted(since) => now.saturating_duration_since(since) > grace,
            _ => false,
        }
    }

    /// Produce the next record.
    pub fn feed(&mut self) -> Vec<u8> {
        let bytes = match &mut self.source {
            FeedSource::Replay(replay) => replay.next_record(),
            FeedSource::Simulation(model) => model.feed().into_bytes(),
        };
        self.index += 1;
        bytes
    }

    /// Produce the next record and write it to the transport.
    pub fn pump(&mut self) -> HarnessResult<()> {
        let bytes = self.feed();
        self.transport.write(&bytes)
    }

    /// Throw away anything the daemon sent to the device.
    pub fn discard_input(&mut self) -> HarnessResult<()> {
        self.transport.discard_input()
    }

    /// Flush pending writes and stop feeding.
    pub fn retire(&mut self) -> HarnessResult<()> {
        if self.state == FeedState::Retired {
            return Ok(());
        }
        self.transport.drain()?;
        self.state = FeedState::Retired;
        debug!(device = self.name(), "Device retired");
        Ok(())
    }
}
