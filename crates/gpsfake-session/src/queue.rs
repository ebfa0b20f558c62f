//! The run queue: devices and reader sessions visited round robin.

use crate::feed::DeviceFeed;
use crate::reader::ReaderSession;
use parking_lot::Mutex;
use std::sync::Arc;

/// Shared handle on a device.
pub type DeviceRef = Arc<Mutex<DeviceFeed>>;

/// Shared handle on a reader session.
pub type ReaderRef = Arc<Mutex<ReaderSession>>;

/// Something the scheduler visits.
///
/// Entries carry the identity they are looked up by, so queue operations
/// never lock a device or session. The scheduler holds those locks for a
/// whole feed or poll.
#[derive(Debug, Clone)]
pub enum QueueEntry {
    /// A fake GPS (writer).
    Device {
        /// Transport name, fixed at construction.
        name: String,
        /// The device itself.
        feed: DeviceRef,
    },
    /// A client session (reader).
    Reader {
        /// Session id.
        id: u32,
        /// The session itself.
        session: ReaderRef,
    },
}

impl QueueEntry {
    /// Wrap a device for queueing.
    pub fn device(feed: DeviceFeed) -> Self {
        Self::Device {
            name: feed.name().to_string(),
            feed: Arc::new(Mutex::new(feed)),
        }
    }

    /// Wrap a client session for queueing.
    pub fn reader(session: ReaderSession) -> Self {
        Self::Reader {
            id: session.id(),
            session: Arc::new(Mutex::new(session)),
        }
    }
}

/// Ordered entries plus the round-robin cursor.
#[derive(Debug, Default)]
pub struct RunQueue {
    entries: Vec<QueueEntry>,
    index: usize,
    writers: usize,
    readers: usize,
}

impl RunQueue {
    /// Empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Devices currently queued.
    pub fn writers(&self) -> usize {
        self.writers
    }

    /// Reader sessions currently queued.
    pub fn readers(&self) -> usize {
        self.readers
    }

    /// Cursor position.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Append an entry at the end of the cycle.
    pub fn append(&mut self, entry: QueueEntry) {
        match &entry {
            QueueEntry::Device { .. } => self.writers += 1,
            QueueEntry::Reader { .. } => self.readers += 1,
        }
        self.entries.push(entry);
    }

    fn remove_at(&mut self, position: usize) -> QueueEntry {
        let entry = self.entries.remove(position);
        match &entry {
            QueueEntry::Device { .. } => self.writers -= 1,
            QueueEntry::Reader { .. } => self.readers -= 1,
        }
        self.index = self.index.min(self.entries.len().saturating_sub(1));
        entry
    }

    /// Find a device by name.
    pub fn find_device(&self, name: &str) -> Option<DeviceRef> {
        self.entries.iter().find_map(|entry| match entry {
            QueueEntry::Device { name: queued, feed } if queued == name => Some(Arc::clone(feed)),
            _ => None,
        })
    }

    /// Whether this exact device is still queued.
    pub fn contains_device(&self, device: &DeviceRef) -> bool {
        self.entries.iter().any(|entry| {
            matches!(entry, QueueEntry::Device { feed, .. } if Arc::ptr_eq(feed, device))
        })
    }

    /// Remove a device by name.
    pub fn remove_device(&mut self, name: &str) -> Option<DeviceRef> {
        let position = self.entries.iter().position(|entry| {
            matches!(entry, QueueEntry::Device { name: queued, .. } if queued == name)
        })?;
        match self.remove_at(position) {
            QueueEntry::Device { feed, .. } => Some(feed),
            QueueEntry::Reader { .. } => None,
        }
    }

    /// Remove a reader session by id.
    pub fn remove_reader(&mut self, id: u32) -> Option<ReaderRef> {
        let position = self.entries.iter().position(|entry| {
            matches!(entry, QueueEntry::Reader { id: queued, .. } if *queued == id)
        })?;
        match self.remove_at(position) {
            QueueEntry::Reader { session, .. } => Some(session),
            QueueEntry::Device { .. } => None,
        }
    }

    /// Next entry in round-robin order.
    ///
    /// The cursor wraps with the current length, so entries added or
    /// removed between calls change the cycle but never push the cursor
    /// out of range.
    pub fn choose(&mut self) -> Option<QueueEntry> {
        if self.entries.is_empty() {
            return None;
        }
        let chosen = self.index.min(self.entries.len() - 1);
        self.index = (chosen + 1) % self.entries.len();
        Some(self.entries[chosen].clone())
    }

    /// Snapshot of the queued devices.
    pub fn devices(&self) -> Vec<DeviceRef> {
        self.entries
            .iter()
            .filter_map(|entry| match entry {
                QueueEntry::Device { feed, .. } => Some(Arc::clone(feed)),
                QueueEntry::Reader { .. } => None,
            })
            .collect()
    }
}
