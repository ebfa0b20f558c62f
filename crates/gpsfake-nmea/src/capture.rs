//! Capture-log digestion.
//!
//! A capture is a recorded device session. Digesting it yields the records
//! to cycle into a fake device, plus whatever the capture's magic comments
//! say about how to present it:
//!
//! - `# Serial: <ignored> <baud> <databits><parity><stopbits>` sets line parameters
//! - a comment mentioning `UDP` asks for a UDP feed instead of a pty
//! - a comment containing `%` is kept in sequence as a directive
//!   (e.g. `# %Delay: 5` pauses the feed for five seconds)

use crate::framer::{LineFramer, Packet, PacketKind, PacketSource};
use gpsfake_common::error::{HarnessError, HarnessResult};
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, trace};

/// Serial parity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    /// No parity bit.
    None,
    /// Odd parity.
    Odd,
    /// Even parity.
    Even,
}

/// Serial line parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialParams {
    /// Line speed in bits per second.
    pub baud: u32,
    /// 7 or 8.
    pub data_bits: u8,
    /// Parity setting.
    pub parity: Parity,
    /// 1 or 2.
    pub stop_bits: u8,
}

impl SerialParams {
    /// 8N1 at the given speed.
    pub fn with_baud(baud: u32) -> Self {
        Self {
            baud,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: 1,
        }
    }

    /// Parse the text of a `Serial:` comment.
    ///
    /// Expects exactly three tokens after the comment marker: a label that is
    /// ignored, the baud rate, and a word like `8N1`.
    pub fn parse_comment(comment: &str) -> Option<Self> {
        let text = comment.trim().strip_prefix('#').unwrap_or(comment).trim();
        let tokens: Vec<&str> = text.split_whitespace().collect();
        let [_, baud, params] = tokens.as_slice() else {
            return None;
        };
        let baud = baud.parse().ok()?;
        let mut params = params.chars();
        let data_bits = match params.next()? {
            '7' => 7,
            '8' => 8,
            _ => return None,
        };
        let parity = match params.next()? {
            'N' => Parity::None,
            'O' => Parity::Odd,
            'E' => Parity::Even,
            _ => return None,
        };
        let stop_bits = match params.next()? {
            '1' => 1,
            '2' => 2,
            _ => return None,
        };
        Some(Self {
            baud,
            data_bits,
            parity,
            stop_bits,
        })
    }
}

impl fmt::Display for SerialParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parity = match self.parity {
            Parity::None => 'N',
            Parity::Odd => 'O',
            Parity::Even => 'E',
        };
        write!(f, "{} {}{}{}", self.baud, self.data_bits, parity, self.stop_bits)
    }
}

/// How the capture wants to be fed to the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportHint {
    /// Through a pseudo-terminal.
    #[default]
    Pty,
    /// As UDP datagrams.
    Udp,
}

/// One replayable element of a capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    /// Device output, replayed byte for byte.
    Sentence(Vec<u8>),
    /// Harness directive carried in a comment.
    Directive {
        /// Comment text without the `#` marker.
        text: String,
        /// The comment exactly as captured.
        raw: Vec<u8>,
    },
}

impl LogRecord {
    /// Bytes to write to the device.
    pub fn bytes(&self) -> &[u8] {
        match self {
            Self::Sentence(bytes) => bytes,
            Self::Directive { raw, .. } => raw,
        }
    }

    /// Pause requested by a `%Delay: <seconds>` directive.
    pub fn delay(&self) -> Option<Duration> {
        let Self::Directive { text, .. } = self else {
            return None;
        };
        if !text.contains("%Delay:") {
            return None;
        }
        text.split_whitespace()
            .nth(1)
            .and_then(|secs| secs.parse().ok())
            .map(Duration::from_secs)
    }
}

/// A digested capture.
#[derive(Debug, Clone, PartialEq)]
pub struct Capture {
    /// Where the capture came from (usually its file name).
    pub name: String,
    /// Records in capture order.
    pub records: Vec<LogRecord>,
    /// Line parameters from a `Serial:` comment.
    pub serial: Option<SerialParams>,
    /// Requested transport.
    pub transport: TransportHint,
    /// Whether the first device packet was NMEA text.
    pub textual: bool,
}

impl Capture {
    /// Number of records, directives included.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when the capture has no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Record at a replay position; wraps around so a capture can be cycled.
    pub fn record(&self, index: usize) -> Option<&LogRecord> {
        if self.records.is_empty() {
            None
        } else {
            self.records.get(index % self.records.len())
        }
    }
}

/// Turns a packet stream into a [`Capture`].
#[derive(Debug, Clone, Default)]
pub struct LogDigester {
    predump: bool,
}

impl LogDigester {
    /// Create a digester.
    pub fn new() -> Self {
        Self::default()
    }

    /// Log every digested device packet at trace level.
    pub fn with_predump(mut self, predump: bool) -> Self {
        self.predump = predump;
        self
    }

    /// Digest a capture file.
    pub fn digest_file(&self, path: &Path) -> HarnessResult<Capture> {
        let file = File::open(path)
            .map_err(|e| HarnessError::IoError(format!("{}: {e}", path.display())))?;
        let mut framer = LineFramer::new(BufReader::new(file));
        self.digest(&path.display().to_string(), &mut framer)
    }

    /// Digest every packet of `source`.
    pub fn digest<S: PacketSource + ?Sized>(
        &self,
        name: &str,
        source: &mut S,
    ) -> HarnessResult<Capture> {
        let mut capture = Capture {
            name: name.to_string(),
            records: Vec::new(),
            serial: None,
            transport: TransportHint::Pty,
            textual: false,
        };
        let mut type_latch = None;
        let mut line = 0usize;

        while let Some(packet) = source.next_packet()? {
            line += 1;
            if packet.kind == PacketKind::Comment {
                self.digest_comment(&mut capture, packet)?;
                continue;
            }
            if type_latch.is_none() {
                type_latch = Some(packet.kind);
            }
            if self.predump {
                trace!(capture = name, packet = ?packet.text(), "Digested packet");
            }
            if packet.payload().is_empty() {
                return Err(HarnessError::MalformedCapture {
                    source_name: name.to_string(),
                    reason: format!("blank line {line} (remove it to replay the capture)"),
                });
            }
            capture.records.push(LogRecord::Sentence(packet.bytes));
        }

        if capture.is_empty() {
            return Err(HarnessError::MalformedCapture {
                source_name: name.to_string(),
                reason: "no replayable packets".into(),
            });
        }

        capture.textual = type_latch == Some(PacketKind::Nmea);
        debug!(
            capture = name,
            records = capture.len(),
            textual = capture.textual,
            serial = ?capture.serial,
            transport = ?capture.transport,
            "Capture digested"
        );
        Ok(capture)
    }

    fn digest_comment(&self, capture: &mut Capture, packet: Packet) -> HarnessResult<()> {
        let text = packet.text();
        if text.contains("Serial:") {
            let serial =
                SerialParams::parse_comment(&text).ok_or_else(|| HarnessError::InvalidSerialSpec {
                    source_name: capture.name.clone(),
                    spec: text.trim().to_string(),
                })?;
            capture.serial = Some(serial);
        } else if text.contains("UDP") {
            capture.transport = TransportHint::Udp;
        } else if text.contains('%') {
            let directive = text.trim_start_matches('#').trim().to_string();
            capture.records.push(LogRecord::Directive {
                text: directive,
                raw: packet.bytes,
            });
        }
        Ok(())
    }
}
