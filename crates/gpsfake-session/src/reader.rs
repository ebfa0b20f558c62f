//! Client reader sessions.
//!
//! A reader session is a daemon client visited by the scheduler like any
//! device: on its turn it ships its pending command batch (once) and then
//! forwards every complete response already waiting on the connection.

use gpsfake_common::error::{HarnessError, HarnessResult};
use std::fmt;
use std::io::{self, ErrorKind, Read, Write};
use std::net::TcpStream;
use tracing::{debug, trace};

/// Client connection to the daemon.
pub trait ReaderConnection: Send {
    /// Send a command batch.
    fn send(&mut self, commands: &str) -> io::Result<()>;

    /// Whether a response (or part of one) is waiting. Must not block.
    fn has_data(&mut self) -> io::Result<bool>;

    /// Read what is available and return the next complete response, if any.
    fn poll(&mut self) -> io::Result<Option<String>>;
}

/// One client session in the run queue.
pub struct ReaderSession {
    id: u32,
    pending: Option<String>,
    conn: Box<dyn ReaderConnection>,
}

impl fmt::Debug for ReaderSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReaderSession")
            .field("id", &self.id)
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

impl ReaderSession {
    /// Wrap `conn` as session `id`.
    pub fn new(id: u32, conn: Box<dyn ReaderConnection>) -> Self {
        Self {
            id,
            pending: None,
            conn,
        }
    }

    /// Session identifier.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Command batch waiting to be sent, if any.
    pub fn pending(&self) -> Option<&str> {
        self.pending.as_deref()
    }

    /// Queue `commands` for the session's next turn, replacing any batch
    /// not yet sent.
    pub fn enqueue(&mut self, commands: impl Into<String>) {
        self.pending = Some(commands.into());
    }

    /// Send `commands` right away.
    pub fn send_now(&mut self, commands: &str) -> HarnessResult<()> {
        let id = self.id;
        self.conn.send(commands).map_err(|e| reader_error(id, e))
    }

    /// One scheduling turn: ship the pending batch, then pass every complete
    /// response to `report`. Returns whether the session produced output.
    pub fn service(&mut self, report: &mut dyn FnMut(u32, &str)) -> HarnessResult<bool> {
        let id = self.id;
        if let Some(commands) = self.pending.take() {
            debug!(client = id, commands = %commands, "Sending queued commands");
            self.conn.send(&commands).map_err(|e| reader_error(id, e))?;
        }

        let mut had_output = false;
        while self.conn.has_data().map_err(|e| reader_error(id, e))? {
            if let Some(response) = self.conn.poll().map_err(|e| reader_error(id, e))? {
                report(id, &response);
            }
            had_output = true;
        }
        Ok(had_output)
    }
}

fn reader_error(id: u32, e: io::Error) -> HarnessError {
    HarnessError::Reader {
        id,
        reason: e.to_string(),
    }
}

/// Line-oriented TCP client for the daemon's client port.
#[derive(Debug)]
pub struct GpsdClient {
    stream: TcpStream,
    buffer: Vec<u8>,
    closed: bool,
}

impl GpsdClient {
    /// Connect to `host:port`.
    pub fn connect(host: &str, port: u16) -> io::Result<Self> {
        let stream = TcpStream::connect((host, port))?;
        debug!(host, port, "Client connected");
        Ok(Self::from_stream(stream))
    }

    /// Use an already connected stream.
    pub fn from_stream(stream: TcpStream) -> Self {
        Self {
            stream,
            buffer: Vec::new(),
            closed: false,
        }
    }

    fn has_complete_line(&self) -> bool {
        self.buffer.contains(&b'\n')
    }

    fn fill(&mut self) -> io::Result<()> {
        let mut chunk = [0u8; 4096];
        self.stream.set_nonblocking(true)?;
        let result = self.stream.read(&mut chunk);
        self.stream.set_nonblocking(false)?;
        match result {
            Ok(0) => self.closed = true,
            Ok(n) => self.buffer.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == ErrorKind::WouldBlock => {}
            Err(e) => return Err(e),
        }
        Ok(())
    }
}

impl ReaderConnection for GpsdClient {
    fn send(&mut self, commands: &str) -> io::Result<()> {
        self.stream.write_all(commands.as_bytes())
    }

    fn has_data(&mut self) -> io::Result<bool> {
        if self.has_complete_line() {
            return Ok(true);
        }
        if self.closed {
            return Ok(false);
        }
        let mut peeked = [0u8; 1];
        self.stream.set_nonblocking(true)?;
        let result = self.stream.peek(&mut peeked);
        self.stream.set_nonblocking(false)?;
        match result {
            Ok(0) => {
                self.closed = true;
                Ok(false)
            }
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn poll(&mut self) -> io::Result<Option<String>> {
        if !self.has_complete_line() && !self.closed {
            self.fill()?;
        }
        let Some(end) = self.buffer.iter().position(|&b| b == b'\n') else {
            return Ok(None);
        };
        let line: Vec<u8> = self.buffer.drain(..=end).collect();
        let response = String::from_utf8_lossy(&line).trim_end().to_string();
        let class = serde_json::from_str::<serde_json::Value>(&response)
            .ok()
            .and_then(|v| v.get("class").and_then(|c| c.as_str()).map(str::to_owned));
        trace!(class = class.as_deref().unwrap_or("-"), len = response.len(), "Response");
        Ok(Some(response))
    }
}
