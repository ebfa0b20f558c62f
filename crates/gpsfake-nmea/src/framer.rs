//! Packet framing for capture logs.
//!
//! The digester only needs "give me the next packet and tell me what kind
//! it is"; [`PacketSource`] is that seam. [`LineFramer`] handles the common
//! case of line-oriented NMEA captures with `#` comments.

use gpsfake_common::error::HarnessResult;
use std::io::BufRead;

/// Kind of a framed packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    /// `#` comment; may carry harness directives.
    Comment,
    /// NMEA 0183 / AIVDM text sentence.
    Nmea,
    /// Anything else, replayed verbatim.
    Binary,
}

/// One framed packet, bytes exactly as they appeared in the capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// What the framer recognised.
    pub kind: PacketKind,
    /// Raw bytes including any line terminator.
    pub bytes: Vec<u8>,
}

impl Packet {
    /// Packet contents without the trailing line terminator.
    pub fn payload(&self) -> &[u8] {
        let mut end = self.bytes.len();
        while end > 0 && matches!(self.bytes[end - 1], b'\r' | b'\n') {
            end -= 1;
        }
        &self.bytes[..end]
    }

    /// Payload as text, lossily decoded.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(self.payload()).into_owned()
    }
}

/// Source of framed packets.
pub trait PacketSource {
    /// Next packet, or `None` at end of input.
    fn next_packet(&mut self) -> HarnessResult<Option<Packet>>;
}

/// Line-oriented framer.
#[derive(Debug)]
pub struct LineFramer<R> {
    reader: R,
}

impl<R: BufRead> LineFramer<R> {
    /// Frame packets from `reader`.
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

impl<R: BufRead> PacketSource for LineFramer<R> {
    fn next_packet(&mut self) -> HarnessResult<Option<Packet>> {
        let mut bytes = Vec::new();
        if self.reader.read_until(b'\n', &mut bytes)? == 0 {
            return Ok(None);
        }
        let kind = match bytes.first() {
            Some(b'#') => PacketKind::Comment,
            Some(b'$') | Some(b'!') => PacketKind::Nmea,
            _ => PacketKind::Binary,
        };
        Ok(Some(Packet { kind, bytes }))
    }
}
