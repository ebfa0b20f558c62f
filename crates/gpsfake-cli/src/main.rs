//! gpsfake entry point.
//!
//! Starts the daemon under test, feeds it one fake device per capture file
//! (plus an optional dead-reckoning device), attaches a watching client and
//! runs the session until every device has been replayed.

mod signals;

use anyhow::{bail, Context, Result};
use clap::Parser;
use gpsfake_common::config::HarnessConfig;
use gpsfake_nmea::capture::{Capture, LogDigester, SerialParams, TransportHint};
use gpsfake_nmea::navigation::NavigationModel;
use gpsfake_nmea::voyage::VoyagePlan;
use gpsfake_session::transport::{ByteTransport, UdpTransport};
use gpsfake_session::{single_pass, DeviceFeed, RunSummary, SessionHandle, SessionScheduler};
use std::io::Write;
use std::path::PathBuf;
use tracing::{info, warn};

/// gpsfake command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "gpsfake",
    about = "Feed captured or simulated GPS data to gpsd through fake devices",
    version,
    long_about = None
)]
struct Args {
    /// Capture files to replay, one fake device each.
    #[arg(value_name = "LOGFILE")]
    logfiles: Vec<PathBuf>,

    /// Client port for the daemon.
    #[arg(long, short = 'P')]
    port: Option<u16>,

    /// Extra daemon option (repeatable).
    #[arg(long, short = 'o', value_name = "OPTION", allow_hyphen_values = true)]
    options: Vec<String>,

    /// Command to run the daemon under, e.g. "valgrind --tool=memcheck".
    #[arg(long, value_name = "COMMAND")]
    prefix: Option<String>,

    /// Line speed for pty devices when the capture does not name one.
    #[arg(long, short = 's', value_name = "BAUD")]
    speed: Option<u32>,

    /// Feed devices over UDP instead of ptys.
    #[arg(long, short = 'u')]
    udp: bool,

    /// Replay each capture once instead of cycling.
    #[arg(long, short = '1')]
    once: bool,

    /// Commands the client sends on connect.
    #[arg(long, short = 'c', value_name = "COMMANDS")]
    client_init: Option<String>,

    /// Print client responses on stdout.
    #[arg(long, short = 'p')]
    pipe: bool,

    /// Log every digested packet.
    #[arg(long, short = 'x')]
    predump: bool,

    /// Add a dead-reckoning device driven by the configured voyage.
    #[arg(long)]
    simulate: bool,

    /// Run the scheduler on a worker thread.
    #[arg(long)]
    threaded: bool,

    /// Path to a configuration file (TOML).
    #[arg(long, short = 'C', value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, short = 'l', default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting gpsfake");

    let mut config = load_config(&args)?;
    apply_overrides(&mut config, &args);

    if args.logfiles.is_empty() && !args.simulate {
        bail!("no capture files given; pass at least one LOGFILE or --simulate");
    }

    // Every capture is digested before the daemon starts.
    let digester = LogDigester::new().with_predump(config.session.predump);
    let captures = args
        .logfiles
        .iter()
        .map(|path| {
            digester
                .digest_file(path)
                .with_context(|| format!("Failed to digest {}", path.display()))
        })
        .collect::<Result<Vec<_>>>()?;

    signals::install().context("Failed to set up signal handlers")?;

    // A signal during the readiness wait abandons it and kills the daemon.
    let mut scheduler = SessionScheduler::spawn_until(&config, signals::stop_requested)
        .context("Failed to start the daemon")?;
    if args.pipe {
        scheduler.set_reporter(|_: u32, response: &str| {
            let mut out = std::io::stdout().lock();
            // A closed stdout just stops the echo.
            let _ = writeln!(out, "{response}");
        });
    }

    let handle = scheduler.handle();
    signals::watch(handle.clone()).context("Failed to start the signal watcher")?;
    if args.once {
        handle.set_predicate(single_pass());
    }

    if let Err(e) = add_devices(&handle, &config, captures, args.simulate) {
        // Leave no daemon behind.
        if let Err(cleanup) = scheduler.cleanup() {
            warn!(error = %cleanup, "Cleanup failed");
        }
        return Err(e);
    }

    let summary = if args.threaded {
        run_threaded(scheduler, &config)?
    } else {
        add_client(&handle, &config)?;
        scheduler.run().context("Session failed")?
    };

    info!(
        turns = summary.turns,
        records = summary.records_fed,
        responses = summary.responses,
        retired = summary.devices_retired,
        interrupted = signals::stop_requested(),
        "Session complete"
    );
    Ok(())
}

/// Initialize logging with the specified log level.
fn init_logging(level: &str) {
    let filter = format!(
        "gpsfake={},gpsfake_session={},gpsfake_nmea={},gpsfake_common={}",
        level, level, level, level
    );

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(true)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Resolution priority (first existing file wins):
/// 1. Command-line `--config` argument
/// 2. `GPSFAKE_CONFIG` environment variable
/// 3. `gpsfake.toml` in the working directory
/// 4. Built-in defaults
fn load_config(args: &Args) -> Result<HarnessConfig> {
    if let Some(config_path) = &args.config {
        info!(?config_path, "Loading config from command-line argument");
        return HarnessConfig::from_file(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path));
    }

    if let Ok(env_path) = std::env::var("GPSFAKE_CONFIG") {
        let config_path = PathBuf::from(&env_path);
        if config_path.exists() {
            info!(?config_path, "Loading config from GPSFAKE_CONFIG");
            return HarnessConfig::from_file(&config_path).with_context(|| {
                format!("Failed to load config from GPSFAKE_CONFIG={:?}", env_path)
            });
        }
        warn!(
            path = %env_path,
            "GPSFAKE_CONFIG set but file does not exist, checking other locations"
        );
    }

    let local_path = PathBuf::from("gpsfake.toml");
    if local_path.exists() {
        info!(?local_path, "Loading config from working directory");
        return HarnessConfig::from_file(&local_path)
            .with_context(|| format!("Failed to load config from {:?}", local_path));
    }

    info!("No config file found, using built-in defaults");
    Ok(HarnessConfig::default())
}

/// Command-line arguments win over the configuration file.
fn apply_overrides(config: &mut HarnessConfig, args: &Args) {
    if let Some(port) = args.port {
        config.daemon.port = port;
    }
    if !args.options.is_empty() {
        config.daemon.options = args.options.clone();
    }
    if let Some(prefix) = &args.prefix {
        config.daemon.prefix = prefix.split_whitespace().map(str::to_owned).collect();
    }
    if let Some(speed) = args.speed {
        config.session.baud = speed;
    }
    if let Some(commands) = &args.client_init {
        config.session.client_init = commands.clone();
    }
    config.session.udp |= args.udp;
    config.session.predump |= args.predump;
}

/// Queue one device per capture, plus the simulated one if asked for.
fn add_devices(
    handle: &SessionHandle,
    config: &HarnessConfig,
    captures: Vec<Capture>,
    simulate: bool,
) -> Result<()> {
    for capture in captures {
        let source = capture.name.clone();
        let transport = open_transport(&capture, config)
            .with_context(|| format!("Failed to open a device for {source}"))?;
        let feed = DeviceFeed::replay(capture, config.pacing.write_pad, transport);
        let device = handle
            .add_device(feed)
            .with_context(|| format!("Failed to add the device for {source}"))?;
        info!(%device, %source, "Replaying capture");
    }

    if simulate {
        let sim = &config.simulator;
        let model = NavigationModel::new(sim.start_time, sim.latitude, sim.longitude)
            .with_pacing(config.pacing.sentence_interval)
            .with_plan(VoyagePlan::from_config(sim));
        let transport = open_pty(&SerialParams::with_baud(config.session.baud))
            .context("Failed to open the simulated device")?;
        let device = handle
            .add_device(DeviceFeed::simulated(model, transport))
            .context("Failed to add the simulated device")?;
        info!(%device, legs = sim.legs.len(), "Simulating voyage");
    }
    Ok(())
}

fn open_transport(capture: &Capture, config: &HarnessConfig) -> Result<Box<dyn ByteTransport>> {
    if capture.transport == TransportHint::Udp || config.session.udp {
        return Ok(Box::new(UdpTransport::open(&config.session.udp_target)?));
    }
    let params = capture
        .serial
        .unwrap_or_else(|| SerialParams::with_baud(config.session.baud));
    open_pty(&params)
}

#[cfg(target_os = "linux")]
fn open_pty(params: &SerialParams) -> Result<Box<dyn ByteTransport>> {
    Ok(Box::new(gpsfake_session::PtyTransport::open(params)?))
}

#[cfg(not(target_os = "linux"))]
fn open_pty(_params: &SerialParams) -> Result<Box<dyn ByteTransport>> {
    bail!("pty devices are only supported on Linux; use --udp")
}

fn add_client(handle: &SessionHandle, config: &HarnessConfig) -> Result<u32> {
    let port = config.daemon.port;
    let id = handle
        .add_client("127.0.0.1", port, Some(config.session.client_init.as_str()))
        .with_context(|| format!("Failed to connect a client on port {port}"))?;
    info!(client = id, port, "Client attached");
    Ok(id)
}

/// Start the worker first so client commands go out on the session's turn.
fn run_threaded(scheduler: SessionScheduler, config: &HarnessConfig) -> Result<RunSummary> {
    let worker = scheduler
        .start()
        .context("Failed to start the scheduler worker")?;
    if let Err(e) = add_client(&worker.handle(), config) {
        if let Err(stop) = worker.stop() {
            warn!(error = %stop, "Scheduler worker failed while stopping");
        }
        return Err(e);
    }
    worker.join().context("Session failed")
}
