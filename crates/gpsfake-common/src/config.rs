//! Configuration structures for the test harness.
//!
//! Supports TOML deserialization with defaults that reproduce the
//! behaviour of the stock `gpsfake` regression tester.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level harness configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// How to find, launch and talk to the daemon-under-test.
    pub daemon: DaemonConfig,

    /// Real-time pacing of feeds, retirement and daemon polling.
    pub pacing: PacingConfig,

    /// Device and client defaults for a test session.
    pub session: SessionConfig,

    /// Dead-reckoning simulator configuration.
    pub simulator: SimulatorConfig,
}

/// Daemon launch configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Executable name looked up on the search path.
    pub program: String,

    /// Environment variable naming colon-separated install roots,
    /// searched ahead of `PATH`.
    pub home_env: String,

    /// Install roots searched before anything named by `home_env`.
    pub install_roots: Vec<PathBuf>,

    /// System directory appended to `PATH` when it is missing.
    pub fallback_dir: PathBuf,

    /// Client port the daemon listens on.
    pub port: u16,

    /// Extra daemon options, appended after the fixed flags.
    pub options: Vec<String>,

    /// Diagnostic wrapper command (e.g. `valgrind --tool=memcheck`).
    pub prefix: Vec<String>,

    /// Directory for the control socket and pid file.
    pub scratch_dir: PathBuf,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            program: String::from("gpsd"),
            home_env: String::from("GPSD_HOME"),
            install_roots: Vec::new(),
            fallback_dir: PathBuf::from("/usr/sbin"),
            port: 2947,
            options: Vec::new(),
            prefix: Vec::new(),
            scratch_dir: PathBuf::from("/tmp"),
        }
    }
}

/// Timing knobs.
///
/// The write pad and close delay are derived from observation: too high and
/// the tests slow down, too low and responses go missing from the end of the
/// test output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    /// Real-time interval between simulated sentences.
    #[serde(with = "humantime_serde")]
    pub sentence_interval: Duration,

    /// Delay after each replayed record so pty buffers are not flooded.
    #[serde(with = "humantime_serde")]
    pub write_pad: Duration,

    /// Grace interval between a device running dry and its removal.
    #[serde(with = "humantime_serde")]
    pub close_delay: Duration,

    /// Retry interval while the pid file does not exist.
    #[serde(with = "humantime_serde")]
    pub ready_retry: Duration,

    /// Retry interval while the pid file is only partially written.
    #[serde(with = "humantime_serde")]
    pub ready_reparse: Duration,

    /// Interval between termination signals during shutdown.
    #[serde(with = "humantime_serde")]
    pub kill_interval: Duration,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            sentence_interval: Duration::from_secs(1),
            write_pad: Duration::from_millis(1),
            close_delay: Duration::from_secs(1),
            ready_retry: Duration::from_millis(100),
            ready_reparse: Duration::from_millis(500),
            kill_interval: Duration::from_millis(10),
        }
    }
}

/// Session-wide device and client defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Feed every capture over UDP instead of a pty.
    pub udp: bool,

    /// Destination for UDP feeds (host:port).
    pub udp_target: String,

    /// Line speed for pty devices without a `Serial:` header.
    pub baud: u32,

    /// Log every digested packet.
    pub predump: bool,

    /// Commands sent by each new client session.
    pub client_init: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            udp: false,
            udp_target: String::from("127.0.0.1:5000"),
            baud: 4800,
            predump: false,
            client_init: String::from("?WATCH={\"enable\":true,\"json\":true};"),
        }
    }
}

/// Dead-reckoning simulator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Simulated clock at start (epoch seconds).
    pub start_time: f64,

    /// Voyage start latitude (degrees).
    pub latitude: f64,

    /// Voyage start longitude (degrees).
    pub longitude: f64,

    /// Voyage legs, sailed in order and repeated.
    pub legs: Vec<LegConfig>,
}

/// One leg of a configured voyage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LegConfig {
    /// Leg duration in seconds; negative means sail this leg forever.
    pub length: f64,
    /// Course over ground (degrees true).
    pub course: f64,
    /// Speed over ground (knots).
    pub speed: f64,
}

impl LegConfig {
    const fn new(length: f64, course: f64, speed: f64) -> Self {
        Self {
            length,
            course,
            speed,
        }
    }
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        // Harbour circuit off the Swedish west coast.
        Self {
            start_time: 1_330_759_883.0,
            latitude: 58.1388066666,
            longitude: 11.83308166666,
            legs: vec![
                LegConfig::new(50.0, 180.0, 5.0),
                LegConfig::new(103.0, 134.0, 8.0),
                LegConfig::new(40.0, 107.0, 10.0),
                LegConfig::new(4.0, 107.0, 5.0),
                LegConfig::new(8.0, 107.0, 2.5),
                LegConfig::new(2.0, 10.0, 0.0),
                LegConfig::new(54.0, 289.0, 8.0),
                LegConfig::new(105.0, 316.0, 8.0),
                LegConfig::new(22.0, 354.0, 8.0),
                LegConfig::new(4.0, 354.0, 4.0),
                LegConfig::new(2.0, 354.0, 2.0),
                LegConfig::new(2.0, 354.0, 1.0),
                LegConfig::new(1.0, 348.0, 0.0),
            ],
        }
    }
}

impl HarnessConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::Parse)
    }

    /// Serialize configuration to TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error.
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Serde helper module for `Duration` using humantime format.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
