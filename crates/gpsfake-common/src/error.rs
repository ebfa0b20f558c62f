use thiserror::Error;

/// Harness error types covering capture digestion, daemon control, and scheduling.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum HarnessError {
    /// Capture file contained a packet the digester cannot replay.
    #[error("malformed capture {source_name}: {reason}")]
    MalformedCapture {
        /// Name of the capture being digested.
        source_name: String,
        /// What was wrong with it.
        reason: String,
    },

    /// A `Serial:` comment could not be parsed.
    #[error("bad serial-parameter spec in {source_name}: {spec:?}")]
    InvalidSerialSpec {
        /// Name of the capture being digested.
        source_name: String,
        /// The offending comment text.
        spec: String,
    },

    /// Baud rate outside the supported line-speed table.
    #[error("unsupported baud rate {0}")]
    InvalidBaudRate(u32),

    /// No executable daemon found on the search path.
    #[error("cannot execute {program}: executable not found (set {env_var})")]
    ExecutableNotFound {
        /// Program name that was searched for.
        program: String,
        /// Environment variable that overrides the search path.
        env_var: String,
    },

    /// Daemon command terminated by a signal or with a nonzero status.
    #[error("daemon exited abnormally: {0}")]
    AbnormalExit(String),

    /// Run-queue entry the scheduler cannot act on.
    #[error("test object of unknown type: {0}")]
    UnknownQueueEntry(String),

    /// No simulated device registered under this name.
    #[error("no such device: {0}")]
    UnknownDevice(String),

    /// Control-socket connection or exchange failed.
    #[error("control socket error: {0}")]
    ControlSocket(String),

    /// Writing to or flushing a device transport failed.
    #[error("transport error on {device}: {reason}")]
    Transport {
        /// Device name (pty path or UDP URL).
        device: String,
        /// Underlying failure.
        reason: String,
    },

    /// Reader session I/O failed.
    #[error("reader session {id}: {reason}")]
    Reader {
        /// Client session identifier.
        id: u32,
        /// Underlying failure.
        reason: String,
    },

    /// Scheduler worker thread could not be started or panicked.
    #[error("scheduler worker: {0}")]
    Worker(String),

    /// A stop was requested while waiting on the daemon.
    #[error("interrupted while {0}")]
    Interrupted(String),

    /// I/O operation error.
    #[error("I/O error: {0}")]
    IoError(String),
}

impl HarnessError {
    /// Build a transport error for `device` from any displayable cause.
    pub fn transport(device: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Transport {
            device: device.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<std::io::Error> for HarnessError {
    fn from(e: std::io::Error) -> Self {
        Self::IoError(e.to_string())
    }
}

/// Convenience type alias for harness operations.
pub type HarnessResult<T> = Result<T, HarnessError>;
