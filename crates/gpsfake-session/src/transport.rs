//! Byte transports between a fake device and the daemon.
//!
//! The scheduler only ever writes records, throws away whatever the daemon
//! sent back, and drains before retiring a device. [`ByteTransport`] is that
//! contract; the pty implementation lives in [`crate::pty`].

use gpsfake_common::error::{HarnessError, HarnessResult};
use parking_lot::Mutex;
use std::net::UdpSocket;
use std::sync::Arc;
use tracing::trace;

/// Write side of a fake device.
pub trait ByteTransport: Send {
    /// Device name the daemon is told about (a pty path or `udp://host:port`).
    fn name(&self) -> &str;

    /// Write one record.
    fn write(&mut self, bytes: &[u8]) -> HarnessResult<()>;

    /// Drop anything the daemon wrote to the device. Must not block.
    fn discard_input(&mut self) -> HarnessResult<()>;

    /// Block until everything written has been transmitted.
    fn drain(&mut self) -> HarnessResult<()>;
}

/// Sends each record as one UDP datagram.
#[derive(Debug)]
pub struct UdpTransport {
    name: String,
    target: String,
    socket: UdpSocket,
}

impl UdpTransport {
    /// Bind an ephemeral local socket aimed at `target` (`host:port`).
    pub fn open(target: &str) -> HarnessResult<Self> {
        let name = format!("udp://{target}");
        let socket = UdpSocket::bind("0.0.0.0:0")
            .map_err(|e| HarnessError::transport(&name, e.to_string()))?;
        Ok(Self {
            name,
            target: target.to_string(),
            socket,
        })
    }
}

impl ByteTransport for UdpTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn write(&mut self, bytes: &[u8]) -> HarnessResult<()> {
        self.socket
            .send_to(bytes, &self.target)
            .map_err(|e| HarnessError::transport(&self.name, e.to_string()))?;
        trace!(device = %self.name, len = bytes.len(), "Datagram sent");
        Ok(())
    }

    fn discard_input(&mut self) -> HarnessResult<()> {
        Ok(())
    }

    fn drain(&mut self) -> HarnessResult<()> {
        Ok(())
    }
}

/// In-memory transport; every write is appended to a shared log.
///
/// Used for dry runs and tests. Clone the handle from [`writes`](Self::writes)
/// before handing the transport to a feed to observe what was written.
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    name: String,
    writes: Arc<Mutex<Vec<Vec<u8>>>>,
    drained: Arc<Mutex<bool>>,
}

impl MemoryTransport {
    /// Create a transport called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            writes: Arc::new(Mutex::new(Vec::new())),
            drained: Arc::new(Mutex::new(false)),
        }
    }

    /// Shared log of everything written so far.
    pub fn writes(&self) -> Arc<Mutex<Vec<Vec<u8>>>> {
        Arc::clone(&self.writes)
    }

    /// Whether [`ByteTransport::drain`] has been called.
    pub fn was_drained(&self) -> bool {
        *self.drained.lock()
    }
}

impl ByteTransport for MemoryTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn write(&mut self, bytes: &[u8]) -> HarnessResult<()> {
        self.writes.lock().push(bytes.to_vec());
        Ok(())
    }

    fn discard_input(&mut self) -> HarnessResult<()> {
        Ok(())
    }

    fn drain(&mut self) -> HarnessResult<()> {
        *self.drained.lock() = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_transport_records_writes() {
        let mut transport = MemoryTransport::new("mem0");
        let tap = transport.writes();
        transport.write(b"$GPRMC*00\r\n").unwrap();
        transport.write(b"$GPGGA*00\r\n").unwrap();
        assert_eq!(tap.lock().len(), 2);
        assert_eq!(tap.lock()[1], b"$GPGGA*00\r\n");
        assert!(!transport.was_drained());
        transport.drain().unwrap();
        assert!(transport.was_drained());
    }

    #[test]
    fn test_udp_transport_delivers_datagrams() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        let target = receiver.local_addr().unwrap().to_string();
        let mut transport = UdpTransport::open(&target).unwrap();
        assert_eq!(transport.name(), format!("udp://{target}"));

        transport.write(b"$GPRMC,x*00\r\n").unwrap();
        let mut buf = [0u8; 64];
        let n = receiver.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"$GPRMC,x*00\r\n");
    }
}
